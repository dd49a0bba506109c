//! Read session module.
//!
//! State-machine read attempts over the bridge: one session per channel,
//! native result / timeout / cancel racing, and the single normalizer every
//! shell payload passes through.

pub mod manager;
pub mod normalizer;
pub mod session;

pub use manager::ReadManager;
pub use normalizer::{normalize, ScanResult};
pub use session::{ReadOutcome, ReadSession, ReadSessionState};
