//! Hardware bridge module.
//!
//! Trait-based surface over the native shell that owns the physical NFC
//! reader, QR scanner, beeper, and device info. The registry replaces the
//! shell's name-keyed callback globals with owned registrations; the
//! simulator stands in for the shell on development machines.

pub mod native;
pub mod registry;
pub mod sim;

pub use native::{FeedbackCue, NativeBridge, NativeDispatcher, ReadChannel};
pub use registry::{CallbackRegistry, ReadHandler, RegistrationToken};
pub use sim::SimulatedBridge;
