//! AstraGuard Common - shared types for the anomaly guard daemon
//!
//! Mission phases, response classes, anomaly events, decisions, the error
//! taxonomy and the configuration schema. No I/O beyond config loading.

pub mod config;
pub mod decision;
pub mod error;
pub mod types;

pub use config::*;
pub use decision::*;
pub use error::*;
pub use types::*;
