//! kiosk-core: shared library for the pay-per-time kiosk server.
//!
//! Provides the ledger model and its on-disk store, the realtime channel
//! message types and JSON codec, credential hashing, input validation, and
//! the stats rollup.

pub mod codec;
pub mod error;
pub mod identity;
pub mod ledger;
pub mod messages;
pub mod money;
pub mod password;
pub mod stats;
pub mod store;

// Re-export commonly used items at crate root.
pub use error::{KioskError, KioskResult};
pub use ledger::{Ledger, Role, SessionLogEntry, Settings, User, RECENT_LOG_LIMIT};
pub use messages::{ClientMessage, Credentials, LoginKind, ServerMessage, Snapshot};
pub use money::round2;
pub use stats::{compute_stats, Period, Stats};
pub use store::LedgerStore;
