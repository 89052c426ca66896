mod common;

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use alertmux::config::AppConfig;
use alertmux::domain::{Alert, LabelSet, NotifyContext};
use alertmux::error::{IntegrationError, NotifyError, TestReceiversError};
use alertmux::integrations::Notifier;
use alertmux::notify::{
    NotificationHistoryEntry, RateLimits, StaticLimits, TestReceiversParams, TestStatus,
    test_receivers,
};
use alertmux::pipeline::{
    LogEntry, MemoryLog, ReceiverKey, Stage, StaticPeer, SyncFlushStage, SyncMode, WaitStage,
};

use common::{CountingSender, MemoryHistorian, factory, integration, receiver, webhook};

fn params(receivers: Vec<alertmux::config::ApiReceiver>) -> TestReceiversParams {
    TestReceiversParams {
        alert: None,
        receivers,
    }
}

fn group_labels() -> LabelSet {
    let mut labels = LabelSet::new();
    labels.insert("alertname", "HighLatency");
    labels
}

#[tokio::test]
async fn test_malformed_integration_fails_whole_receiver() {
    let sender = Arc::new(CountingSender::new());
    let factory = factory(sender.clone());
    let slack = integration("slack-1", "slack", json!({ "recipient": "#ops", "token": "xoxb" }));

    // The chat API entry is valid on its own.
    let alone = factory.parse_receiver(&receiver("ops", vec![slack.clone()])).unwrap();
    assert_eq!(alone.integrations.len(), 1);

    let ops = receiver(
        "ops",
        vec![slack, integration("discord-1", "discord", json!({ "content": "no url here" }))],
    );
    let result = factory.parse_receiver(&ops);
    let integrations = result.as_ref().map(|c| c.integrations.len()).unwrap_or_default();
    assert_eq!(integrations, 0);

    let err = result.err().unwrap();
    assert_eq!(err.uid, "discord-1");
    assert_eq!(err.integration_type, "discord");
    assert!(err.to_string().contains("could not find webhook url property in settings"));
    assert_eq!(sender.sent_count().await, 0);
}

#[tokio::test]
async fn test_unknown_type_is_not_supported() {
    let factory = factory(Arc::new(CountingSender::new()));
    let ops = receiver("ops", vec![integration("x", "not-a-real-type", json!({}))]);
    let err = factory.parse_receiver(&ops).unwrap_err();
    assert!(err.to_string().contains("is not supported"));
}

#[tokio::test]
async fn test_dispatch_to_twelve_webhooks() {
    let sender = Arc::new(CountingSender::new());
    let factory = factory(sender.clone());
    let zeta = receiver("zeta", (0..6).map(|i| webhook(&format!("zeta-{i}"))).collect());
    let alpha = receiver("alpha", (0..6).map(|i| webhook(&format!("alpha-{i}"))).collect());

    let result = test_receivers(&NotifyContext::new(), params(vec![zeta, alpha]), &factory)
        .await
        .unwrap();

    assert_eq!(sender.sent_count().await, 12);
    let names: Vec<&str> = result.receivers.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, vec!["alpha", "zeta"]);
    for r in &result.receivers {
        assert_eq!(r.configs.len(), 6);
        for (i, c) in r.configs.iter().enumerate() {
            assert_eq!(c.uid, format!("{}-{i}", r.name));
            assert_eq!(c.status, TestStatus::Ok);
            assert!(c.error.is_none());
        }
    }
    assert!(result.notified_at >= result.alert.starts_at);
    assert_eq!(result.status_code(), reqwest::StatusCode::OK);
}

#[tokio::test(start_paused = true)]
async fn test_dispatch_concurrency_is_bounded() {
    let sender = Arc::new(CountingSender::with_delay(Duration::from_millis(50)));
    let factory = factory(sender.clone());
    let receivers = (0..37)
        .map(|i| receiver(&format!("r{i:02}"), vec![webhook(&format!("w{i}"))]))
        .collect();

    let result = test_receivers(&NotifyContext::new(), params(receivers), &factory)
        .await
        .unwrap();

    assert_eq!(sender.sent_count().await, 37);
    assert_eq!(result.receivers.len(), 37);
    assert!(sender.max_in_flight() <= 10, "max in flight {}", sender.max_in_flight());
    assert!(sender.max_in_flight() > 1);
}

#[tokio::test]
async fn test_report_order_is_independent_of_input_order() {
    let a = receiver("a", vec![webhook("a-0"), webhook("a-1")]);
    let b = receiver("b", vec![webhook("b-0")]);
    let c = receiver("c", vec![webhook("c-0"), webhook("c-1"), webhook("c-2")]);

    let factory = factory(Arc::new(CountingSender::new()));
    let first = test_receivers(
        &NotifyContext::new(),
        params(vec![c.clone(), a.clone(), b.clone()]),
        &factory,
    )
    .await
    .unwrap();
    let second = test_receivers(&NotifyContext::new(), params(vec![b, c, a]), &factory)
        .await
        .unwrap();

    let shape = |r: &alertmux::notify::TestReceiversResult| -> Vec<(String, Vec<String>)> {
        r.receivers
            .iter()
            .map(|r| (r.name.clone(), r.configs.iter().map(|c| c.uid.clone()).collect()))
            .collect()
    };
    assert_eq!(shape(&first), shape(&second));
    assert_eq!(shape(&first)[0].0, "a");
}

#[tokio::test]
async fn test_no_receivers() {
    let factory = factory(Arc::new(CountingSender::new()));

    let err = test_receivers(&NotifyContext::new(), params(vec![]), &factory)
        .await
        .unwrap_err();
    assert!(matches!(err, TestReceiversError::NoReceivers));

    let empty = vec![receiver("a", vec![]), receiver("b", vec![])];
    let err = test_receivers(&NotifyContext::new(), params(empty), &factory)
        .await
        .unwrap_err();
    assert!(matches!(err, TestReceiversError::NoReceivers));
}

#[tokio::test]
async fn test_invalid_integration_only_fails_its_own_result() {
    let sender = Arc::new(CountingSender::new());
    let factory = factory(sender.clone());
    let ops = receiver(
        "ops",
        vec![webhook("good"), integration("bad", "discord", json!({}))],
    );

    let result = test_receivers(&NotifyContext::new(), params(vec![ops]), &factory)
        .await
        .unwrap();

    assert_eq!(sender.sent_count().await, 1);
    let configs = &result.receivers[0].configs;
    assert_eq!(configs[0].status, TestStatus::Ok);
    assert_eq!(configs[1].status, TestStatus::Failed);
    let err = configs[1].error.as_ref().unwrap();
    assert!(matches!(err, IntegrationError::Invalid(_)));
    assert!(err.to_string().starts_with("the receiver is invalid"));
    assert_eq!(result.status_code(), reqwest::StatusCode::MULTI_STATUS);

    let only_bad = receiver("bad", vec![integration("bad", "discord", json!({}))]);
    let result = test_receivers(&NotifyContext::new(), params(vec![only_bad]), &factory)
        .await
        .unwrap();
    assert_eq!(result.status_code(), reqwest::StatusCode::BAD_REQUEST);
}

#[tokio::test(start_paused = true)]
async fn test_timeouts_are_classified() {
    let sender = Arc::new(CountingSender::with_delay(Duration::from_secs(60)));
    let factory = factory(sender);
    let ctx = NotifyContext::new().with_timeout(Duration::from_secs(1));

    let result = test_receivers(&ctx, params(vec![receiver("slow", vec![webhook("w0")])]), &factory)
        .await
        .unwrap();

    let config = &result.receivers[0].configs[0];
    assert_eq!(config.status, TestStatus::Failed);
    match config.error.as_ref().unwrap() {
        IntegrationError::Timeout(e) => {
            assert_eq!(e.uid, "w0");
            assert_eq!(e.source, NotifyError::DeadlineExceeded);
            assert!(e.to_string().starts_with("the receiver timed out"));
        }
        other => panic!("expected timeout, got {other:?}"),
    }
    assert_eq!(result.status_code(), reqwest::StatusCode::REQUEST_TIMEOUT);
}

#[tokio::test]
async fn test_vendor_rejection_is_not_a_timeout() {
    let factory = factory(Arc::new(CountingSender::failing(400)));
    let result = test_receivers(
        &NotifyContext::new(),
        params(vec![receiver("ops", vec![webhook("w0")])]),
        &factory,
    )
    .await
    .unwrap();
    let err = result.receivers[0].configs[0].error.as_ref().unwrap();
    assert!(matches!(err, IntegrationError::Notify(NotifyError::Status { status: 400, .. })));
}

#[tokio::test]
async fn test_rate_limit_burst_of_one() {
    let sender = Arc::new(CountingSender::new());
    let limits = StaticLimits {
        per_integration: Some(RateLimits { limit: 0.0, burst: 1 }),
        per_type_default: None,
        recheck: Duration::from_secs(60),
    };
    let factory = factory(sender.clone()).with_rate_limits(Arc::new(limits));
    let config = factory
        .parse_receiver(&receiver("ops", vec![webhook("w0")]))
        .unwrap();
    let ops = factory.build_receiver(&config).unwrap();
    let integration = &ops.integrations[0];

    let alerts = vec![
        Alert::new(group_labels(), LabelSet::new(), chrono::Utc::now()),
        Alert::new(LabelSet::new(), LabelSet::new(), chrono::Utc::now()),
    ];
    let ctx = NotifyContext::new();
    tokio_test::assert_ok!(integration.notify(&ctx, &alerts).await);

    let err = integration.notify(&ctx, &alerts).await.unwrap_err();
    assert_eq!(err, NotifyError::RateLimited);
    assert!(!err.is_retryable());
    assert_eq!(sender.sent_count().await, 1);

    let status = integration.status();
    assert_eq!(status.last_notify_attempt_error.as_deref(), Some("notification rate limited"));
}

#[tokio::test]
async fn test_history_recorded_for_complete_context() {
    let historian = Arc::new(MemoryHistorian::new());
    let factory = factory(Arc::new(CountingSender::new())).with_historian(historian.clone());
    let config = factory
        .parse_receiver(&receiver("ops", vec![webhook("w0")]))
        .unwrap();
    let ops = factory.build_receiver(&config).unwrap();

    let now = chrono::Utc::now();
    let ctx = NotifyContext::new()
        .with_receiver_name("ops")
        .with_group_key("{}:{alertname=\"HighLatency\"}")
        .with_group_labels(group_labels())
        .with_now(now);
    let alert = Alert::new(group_labels(), LabelSet::new(), now);
    ops.integrations[0].notify(&ctx, &[alert]).await.unwrap();

    let entries = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let entries = historian.entries().await;
            if !entries.is_empty() {
                return entries;
            }
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();

    assert_eq!(entries.len(), 1);
    let entry = &entries[0];
    assert_eq!(entry.receiver_name, "ops");
    assert_eq!(entry.integration_name, "webhook");
    assert_eq!(entry.pipeline_time, Some(now));
    assert!(entry.notification_error.is_none());
    assert!(!entry.retry);
}

#[tokio::test]
async fn test_history_dropped_for_incomplete_context() {
    let historian = Arc::new(MemoryHistorian::new());
    let factory = factory(Arc::new(CountingSender::new())).with_historian(historian.clone());
    let config = factory
        .parse_receiver(&receiver("ops", vec![webhook("w0")]))
        .unwrap();
    let ops = factory.build_receiver(&config).unwrap();

    let alert = Alert::new(group_labels(), LabelSet::new(), chrono::Utc::now());
    tokio_test::assert_ok!(ops.integrations[0].notify(&NotifyContext::new(), &[alert]).await);

    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    assert!(historian.entries().await.is_empty());
}

#[test]
fn test_history_entry_reports_every_missing_field() {
    let entry = NotificationHistoryEntry {
        alerts: Vec::new(),
        retry: false,
        notification_error: None,
        duration: Duration::ZERO,
        receiver_name: String::new(),
        integration_name: String::new(),
        integration_index: 0,
        group_labels: None,
        pipeline_time: None,
        group_key: String::new(),
    };

    let msg = entry.validate().unwrap_err().to_string();
    for missing in [
        "missing receiver name",
        "missing integration name",
        "missing group labels",
        "missing pipeline time",
        "missing group key",
    ] {
        assert!(msg.contains(missing), "{missing} not in {msg}");
    }
}

#[tokio::test(start_paused = true)]
async fn test_stages_chain() {
    let log = Arc::new(MemoryLog::new());
    let key = ReceiverKey::new("ops", "webhook", 0);
    let last = chrono::Utc::now();
    log.log(LogEntry {
        group_key: "g".into(),
        receiver: key.clone(),
        timestamp: last,
        pipeline_time: Some(last),
    })
    .await;

    let stages: Vec<Box<dyn Stage>> = vec![
        Box::new(WaitStage::new(Arc::new(StaticPeer(1)), Duration::from_secs(5))),
        Box::new(SyncFlushStage::new(log, key, SyncMode::Sync)),
    ];

    let mut ctx = NotifyContext::new()
        .with_group_key("g")
        .with_group_interval(Duration::from_secs(60))
        .with_now(last + chrono::Duration::seconds(30));
    let mut alerts = vec![Alert::new(group_labels(), LabelSet::new(), last)];
    for stage in &stages {
        (ctx, alerts) = stage.exec(ctx, alerts).await.unwrap();
    }

    assert_eq!(alerts.len(), 1);
    assert_eq!(ctx.now(), Some(last + chrono::Duration::seconds(60)));
}

#[tokio::test]
async fn test_state_loads_config_directory() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("alertmux.yaml"),
        "dispatch:\n  test_timeout_seconds: 5\nobservability:\n  log_format: pretty\n",
    )
    .unwrap();
    std::fs::write(
        dir.path().join("receivers.yaml"),
        r#"
receivers:
  - name: ops
    integrations:
      - uid: ops-hook
        name: ops-hook
        type: webhook
        settings:
          url: http://127.0.0.1:9/hook
  - name: chat
    grafana_managed_receiver_configs:
      - uid: chat-slack
        name: chat-slack
        type: SLACK
        settings:
          url: http://127.0.0.1:9/slack
"#,
    )
    .unwrap();

    let config = AppConfig::load(dir.path()).unwrap();
    assert_eq!(config.settings.dispatch.test_timeout(), Duration::from_secs(5));

    let state = alertmux::AppState::from_settings(config.settings.clone()).unwrap();
    let applied = state.apply_receivers(&config.receivers.receivers).await.unwrap();
    assert_eq!(applied, 2);

    let status = state.receivers_status().await;
    let names: Vec<&str> = status.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, vec!["chat", "ops"]);
    assert_eq!(status[0].integrations[0].integration_type, "slack");
}
