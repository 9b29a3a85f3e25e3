//! WebRTC voice conversation transport.

mod session;

pub use session::{AudioSession, AudioState, ICE_RECOVERY_WINDOW};
