use std::time::Duration;

use parking_lot::Mutex;
use sp_core::PlaybackState;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::events::{EventBus, PlayerEvent};

/// Longest inter-line delay a slow playback speed can stretch to.
pub const MAX_SCALED_LINE_DELAY: Duration = Duration::from_secs(60);

/// Finite-state machine for playback.
///
/// Transitions are the only way the state changes; illegal requests are
/// ignored and reported as `false`.
#[derive(Debug)]
pub struct PlaybackStateManager {
    state: watch::Sender<PlaybackState>,
    speed: Mutex<f64>,
    max_fast_forward_speed: f64,
    events: EventBus,
}

fn is_legal(from: PlaybackState, to: PlaybackState) -> bool {
    use PlaybackState::*;

    if from == to {
        return false;
    }
    match (from, to) {
        (Idle, Loading) => true,
        (Loading, Playing) | (Loading, Idle) => true,
        (Playing, Paused) | (Playing, Waiting) | (Playing, Completed) => true,
        (Paused, Playing) => true,
        (Waiting, Playing) => true,
        (Stopped, Idle) | (Completed, Idle) | (Failed, Idle) => true,
        // stop and fail need a run; terminal states only go back to Idle
        (Idle, _) => false,
        (from, Stopped) | (from, Failed) => !from.is_terminal(),
        _ => false,
    }
}

impl PlaybackStateManager {
    pub fn new(max_fast_forward_speed: f64, events: EventBus) -> Self {
        let (state, _) = watch::channel(PlaybackState::Idle);
        Self {
            state,
            speed: Mutex::new(1.0),
            max_fast_forward_speed: max_fast_forward_speed.max(1.0),
            events,
        }
    }

    pub fn state(&self) -> PlaybackState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<PlaybackState> {
        self.state.subscribe()
    }

    pub fn is_playing(&self) -> bool {
        self.state() == PlaybackState::Playing
    }

    pub fn is_paused(&self) -> bool {
        self.state() == PlaybackState::Paused
    }

    /// Loading, playing, paused or waiting.
    pub fn is_active(&self) -> bool {
        matches!(
            self.state(),
            PlaybackState::Loading
                | PlaybackState::Playing
                | PlaybackState::Paused
                | PlaybackState::Waiting
        )
    }

    pub fn transition(&self, to: PlaybackState) -> bool {
        self.transition_from(None, to)
    }

    fn transition_from(&self, required: Option<PlaybackState>, to: PlaybackState) -> bool {
        let mut old = None;
        self.state.send_if_modified(|current| {
            if required.is_some_and(|required| required != *current) {
                return false;
            }
            if !is_legal(*current, to) {
                return false;
            }
            old = Some(*current);
            *current = to;
            true
        });

        match old {
            Some(old) => {
                debug!(from = %old, to = %to, "playback state changed");
                self.events
                    .publish(PlayerEvent::StateChanged { old, new: to });
                true
            }
            None => false,
        }
    }

    pub fn begin_loading(&self) -> bool {
        self.transition(PlaybackState::Loading)
    }

    pub fn start_playing(&self) -> bool {
        self.transition_from(Some(PlaybackState::Loading), PlaybackState::Playing)
    }

    pub fn pause(&self) -> bool {
        self.transition_from(Some(PlaybackState::Playing), PlaybackState::Paused)
    }

    pub fn resume(&self) -> bool {
        self.transition_from(Some(PlaybackState::Paused), PlaybackState::Playing)
    }

    pub fn begin_waiting(&self) -> bool {
        self.transition_from(Some(PlaybackState::Playing), PlaybackState::Waiting)
    }

    pub fn end_waiting(&self) -> bool {
        self.transition_from(Some(PlaybackState::Waiting), PlaybackState::Playing)
    }

    pub fn stop(&self) -> bool {
        self.transition(PlaybackState::Stopped)
    }

    pub fn complete(&self) -> bool {
        self.transition(PlaybackState::Completed)
    }

    pub fn fail(&self) -> bool {
        self.transition(PlaybackState::Failed)
    }

    /// Drives a finished (or aborted load) run back to `Idle`.
    pub fn reset_to_idle(&self) -> bool {
        self.transition(PlaybackState::Idle)
    }

    pub fn playback_speed(&self) -> f64 {
        *self.speed.lock()
    }

    /// Clamps into `(0, max_fast_forward_speed]` and returns the applied
    /// value. Zero, negative and NaN speeds leave the current speed in place.
    pub fn set_playback_speed(&self, speed: f64) -> f64 {
        let mut current = self.speed.lock();
        if speed > 0.0 {
            *current = speed.min(self.max_fast_forward_speed);
        }
        *current
    }

    /// `delay` divided by the current speed, capped at `MAX_SCALED_LINE_DELAY`.
    pub fn scaled_delay(&self, delay: Duration) -> Duration {
        let secs = delay.as_secs_f64() / self.playback_speed();
        if secs.is_finite() && secs < MAX_SCALED_LINE_DELAY.as_secs_f64() {
            Duration::from_secs_f64(secs)
        } else {
            MAX_SCALED_LINE_DELAY
        }
    }

    pub fn is_fast_forwarding(&self) -> bool {
        self.playback_speed() > 1.0
    }

    pub fn max_fast_forward_speed(&self) -> f64 {
        self.max_fast_forward_speed
    }

    /// Suspends until the state leaves `Paused` or `cancel` fires. Returns
    /// `false` on cancellation.
    pub async fn wait_while_paused(&self, cancel: &CancellationToken) -> bool {
        let mut receiver = self.state.subscribe();
        tokio::select! {
            _ = cancel.cancelled() => false,
            _ = receiver.wait_for(|state| *state != PlaybackState::Paused) => true,
        }
    }
}
