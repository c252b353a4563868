//! # Session Module
//!
//! Everything that lives between one duplex connection and its recognition
//! engine.
//!
//! ## Key Components:
//! - **State machine**: the per-connection session lifecycle
//! - **Engine seam**: the `RecognitionEngine`/`EngineFactory` traits and the
//!   channels audio and events travel over
//! - **Bridge**: thread ownership and guaranteed teardown for one engine
//! - **Scripted engine**: the built-in playback implementation
//! - **Question pool**: startup-loaded, copied per session
//!
//! ## Session Lifecycle:
//! 1. **Idle**: connection open, no session started
//! 2. **Active**: engine running, audio forwarded
//! 3. **Finishing**: graceful stop requested, engine draining
//! 4. **Closed**: engine gone; a fresh start may reuse the connection

pub mod bridge;
pub mod engine;
pub mod questions;
pub mod scripted;

pub use bridge::SessionBridge;
pub use engine::{EngineEvent, EngineFactory, RecognitionEngine, SessionContext};
pub use questions::QuestionPool;
pub use scripted::ScriptedEngineFactory;

/// Lifecycle state of the session owned by one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No session has been started on this connection.
    Idle,
    /// An engine is live and audio is being forwarded.
    Active,
    /// Graceful stop requested; the engine is draining.
    Finishing,
    /// The engine has exited and been released.
    Closed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Active => "active",
            SessionState::Finishing => "finishing",
            SessionState::Closed => "closed",
        }
    }

    /// A start frame is honored only when no engine exists — before the
    /// first start, or after a previous session fully closed. While Active
    /// or Finishing, starts are ignored so a second engine can never exist.
    pub fn can_start(&self) -> bool {
        matches!(self, SessionState::Idle | SessionState::Closed)
    }

    /// Audio is forwarded only while Active; anything else drops chunks
    /// silently.
    pub fn accepts_audio(&self) -> bool {
        matches!(self, SessionState::Active)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_gating() {
        assert!(SessionState::Idle.can_start());
        assert!(SessionState::Closed.can_start());
        assert!(!SessionState::Active.can_start());
        assert!(!SessionState::Finishing.can_start());
    }

    #[test]
    fn test_audio_gating() {
        assert!(SessionState::Active.accepts_audio());
        assert!(!SessionState::Idle.accepts_audio());
        assert!(!SessionState::Finishing.accepts_audio());
        assert!(!SessionState::Closed.accepts_audio());
    }
}
