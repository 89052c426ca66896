use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use alertmux::AppState;
use alertmux::config::AppConfig;
use alertmux::notify::{TestReceiversParams, TestStatus};
use alertmux::observability::{gather_metrics, init_metrics, init_tracing};

#[derive(Parser)]
#[command(name = "alertmux", about = "Alert notification integrations", version)]
struct Cli {
    /// Path to config directory
    #[arg(short, long, default_value = "/etc/alertmux", env = "ALERTMUX_CONFIG")]
    config: PathBuf,

    /// Output format
    #[arg(short, long, default_value = "table")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Default, clap::ValueEnum)]
enum OutputFormat {
    #[default]
    Table,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse and build every configured receiver
    Validate,

    /// Send a test alert through configured receivers
    Test {
        /// Only test this receiver
        #[arg(short, long)]
        receiver: Option<String>,

        /// Print prometheus metrics after the run
        #[arg(long)]
        metrics: bool,
    },

    /// Show the integrations of every receiver
    Status,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let config = AppConfig::load(&cli.config)?;

    init_tracing(
        config.settings.observability.log_format,
        &config.settings.observability.log_level,
    );
    init_metrics();

    tracing::info!(
        config = %cli.config.display(),
        receivers = config.receivers.receivers.len(),
        "starting alertmux"
    );

    let state = AppState::from_settings(config.settings.clone())?;

    match cli.command {
        Commands::Validate => validate(&state, &config, cli.format),
        Commands::Test { receiver, metrics } => {
            let receivers = match receiver {
                Some(name) => {
                    let found = config
                        .receivers
                        .find(&name)
                        .ok_or_else(|| anyhow::anyhow!("receiver not found: {}", name))?;
                    vec![found.clone()]
                }
                None => config.receivers.receivers.clone(),
            };
            let code = test(&state, receivers, cli.format).await?;
            if metrics {
                print!("{}", gather_metrics());
            }
            Ok(code)
        }
        Commands::Status => {
            state.apply_receivers(&config.receivers.receivers).await?;
            let status = state.receivers_status().await;
            match cli.format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&status)?),
                OutputFormat::Table => {
                    for receiver in &status {
                        println!("{} ({} integrations)", receiver.name, receiver.integrations.len());
                        for i in &receiver.integrations {
                            println!(
                                "  {:<28} {:<12} idx={} send_resolved={}",
                                i.name, i.integration_type, i.index, i.send_resolved
                            );
                        }
                    }
                }
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn validate(state: &AppState, config: &AppConfig, format: OutputFormat) -> anyhow::Result<ExitCode> {
    let factory = state.factory();
    let mut report = Vec::new();

    for api in &config.receivers.receivers {
        let errors: Vec<String> = match factory.parse_receiver(api) {
            Err(e) => vec![e.to_string()],
            Ok(parsed) => match factory.build_receiver_integrations_partial(&parsed) {
                (_, None) => Vec::new(),
                (_, Some(errors)) => errors.0.iter().map(ToString::to_string).collect(),
            },
        };
        report.push(serde_json::json!({ "receiver": api.name, "errors": errors }));
    }

    let failed = report
        .iter()
        .filter(|r| r["errors"].as_array().is_some_and(|e| !e.is_empty()))
        .count();

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Table => {
            for r in &report {
                let errors = r["errors"].as_array().cloned().unwrap_or_default();
                let name = r["receiver"].as_str().unwrap_or_default();
                if errors.is_empty() {
                    println!("ok      {}", name);
                } else {
                    println!("invalid {}", name);
                    for e in errors {
                        println!("        {}", e.as_str().unwrap_or_default());
                    }
                }
            }
            println!();
            println!("{} receivers, {} invalid", report.len(), failed);
        }
    }

    Ok(if failed == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn test(
    state: &AppState,
    receivers: Vec<alertmux::config::ApiReceiver>,
    format: OutputFormat,
) -> anyhow::Result<ExitCode> {
    let params = TestReceiversParams {
        alert: None,
        receivers,
    };
    let result = state.test_receivers(params).await?;
    let status = result.status_code();

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&result)?),
        OutputFormat::Table => {
            for receiver in &result.receivers {
                println!("{}", receiver.name);
                for c in &receiver.configs {
                    match (&c.status, &c.error) {
                        (TestStatus::Ok, _) => println!("  [ok]     {} ({})", c.name, c.uid),
                        (_, Some(e)) => println!("  [failed] {} ({}): {}", c.name, c.uid, e),
                        (_, None) => println!("  [failed] {} ({})", c.name, c.uid),
                    }
                }
            }
            println!();
            println!("Notified at: {}", result.notified_at);
            println!("Status: {}", status);
        }
    }

    Ok(if status == reqwest::StatusCode::OK {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
