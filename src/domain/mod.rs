mod alert;
mod context;

pub use alert::*;
pub use context::*;
