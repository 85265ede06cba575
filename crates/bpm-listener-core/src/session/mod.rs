//! Session lifecycle
//!
//! - Observable state ([`state`])
//! - Inbox messages ([`event`])
//! - Detection timeout ([`timeout`])
//! - Resource teardown ([`cleanup`])
//! - The state machine ([`controller`])
//! - Thread-hosted controller ([`handle`])

pub mod cleanup;
pub mod controller;
pub mod event;
pub mod handle;
pub mod state;
pub mod timeout;

pub use controller::{SessionController, StopSignal};
pub use handle::SessionHandle;
pub use state::{SessionState, SessionStatus};
