pub mod clock;
pub mod condition;
pub mod config;
pub mod error;
pub mod node;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::WeftConfig;
pub use error::{Result, WeftError};
pub use node::{Node, NodeKind, NodeType};
pub use types::*;
