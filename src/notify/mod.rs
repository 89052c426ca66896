//! Building integrations and wrapping them with rate limiting, status
//! tracking and history recording.

mod factory;
pub mod ratelimit;
pub mod status;
pub mod test_receivers;

pub use factory::IntegrationFactory;
pub use ratelimit::{LimitsSource, RateLimitedNotifier, RateLimits, StaticLimits, wrap, wrap_with_source};
pub use status::{
    Integration, IntegrationStatus, NotificationHistorian, NotificationHistoryEntry, Receiver,
    ReceiverStatus,
};
pub use test_receivers::{
    TestAlertParams, TestIntegrationResult, TestNotifierBuilder, TestReceiverResult,
    TestReceiversParams, TestReceiversResult, TestStatus, process_integration_error,
    test_receivers,
};
