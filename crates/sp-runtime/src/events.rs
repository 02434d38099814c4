use std::time::Duration;

use sp_core::{PlayStatus, PlaybackState, PlayerError, Value};
use tokio::sync::broadcast;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Notifications published by a single player instance.
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerEvent {
    StateChanged {
        old: PlaybackState,
        new: PlaybackState,
    },
    ScriptStarted {
        script: String,
    },
    CommandExecuting {
        kind: String,
        line: usize,
    },
    CommandExecuted {
        kind: String,
        line: usize,
        elapsed: Duration,
    },
    CommandFailed {
        kind: String,
        line: usize,
        error: PlayerError,
    },
    CommandRetrying {
        kind: String,
        attempt: u32,
        delay: Duration,
    },
    TextRendered {
        line: usize,
    },
    FlowError {
        line: usize,
        error: PlayerError,
    },
    ProgressChanged {
        fraction: f64,
    },
    BreakpointHit {
        line: usize,
    },
    VariableChanged {
        name: String,
        value: Option<Value>,
    },
    PlayFinished {
        status: PlayStatus,
    },
}

/// Per-player broadcast channel. Publishing without subscribers is fine.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<PlayerEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn publish(&self, event: PlayerEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PlayerEvent> {
        self.sender.subscribe()
    }
}

#[cfg(test)]
mod events_tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_events_in_order() {
        let bus = EventBus::new();
        let mut receiver = bus.subscribe();
        bus.publish(PlayerEvent::BreakpointHit { line: 2 });
        bus.publish(PlayerEvent::ProgressChanged { fraction: 0.5 });

        assert_eq!(
            receiver.recv().await.expect("first event"),
            PlayerEvent::BreakpointHit { line: 2 }
        );
        assert_eq!(
            receiver.recv().await.expect("second event"),
            PlayerEvent::ProgressChanged { fraction: 0.5 }
        );
    }

    #[test]
    fn publish_without_subscribers_is_silent() {
        let bus = EventBus::new();
        bus.publish(PlayerEvent::TextRendered { line: 0 });
    }
}
