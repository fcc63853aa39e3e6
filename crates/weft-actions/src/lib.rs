pub mod builtin;
pub mod kind;
pub mod registry;

pub use kind::ActionKind;
pub use registry::{ActionConfig, ActionHandler, ActionRegistry, FnAction};
