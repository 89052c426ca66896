pub mod config;
pub mod domain;
pub mod error;
pub mod integrations;
pub mod notify;
pub mod observability;
pub mod pipeline;
pub mod secrets;

mod state;

pub use state::*;
