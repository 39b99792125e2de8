//! Authentication: credential checks and login throttling.

pub mod gate;
pub mod rate_limit;

pub use rate_limit::LoginLimits;
