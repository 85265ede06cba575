//! Messages delivered into the session controller's inbox
//!
//! Every producer (engine subscription, timeout guard) tags its message with
//! the session generation it was created for. The controller is the single
//! consumer and discards messages from any generation but the current one.

use tokio::sync::mpsc;

use crate::detection::engine::EngineEvent;

/// What happened
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Event emitted by the tempo engine
    Engine(EngineEvent),
    /// The detection deadline elapsed
    TimedOut,
}

/// Event tagged with the session generation that produced it
#[derive(Debug, Clone, PartialEq)]
pub struct SessionMessage {
    pub generation: u64,
    pub event: SessionEvent,
}

/// Sending half of the controller inbox
pub type InboxSender = mpsc::UnboundedSender<SessionMessage>;

/// Receiving half of the controller inbox
pub type InboxReceiver = mpsc::UnboundedReceiver<SessionMessage>;
