//! Live sessions: the registry, the billing meter, and admin control.

pub mod billing;
pub mod control;
pub mod registry;

pub use control::ControlAction;
pub use registry::{Session, SessionRegistry};
