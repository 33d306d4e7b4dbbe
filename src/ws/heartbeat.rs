//! Heartbeat ping/pong liveness monitoring.
//!
//! Each session owns a [`HeartbeatState`]. When heartbeat is enabled the
//! dispatch engine spawns [`run_heartbeat`] next to the reader loop; the
//! two only meet through the pong signal channel, which the `"pong"`
//! route feeds with [`HeartbeatState::signal_pong`].

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::{self, Instant, MissedTickBehavior};

use super::messages::Message;
use super::session::Session;

/// Liveness phase of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatPhase {
    /// A pong arrived since the last ping (or no ping was sent yet).
    Alive,
    /// A ping is outstanding.
    AwaitingPong,
    /// The retry budget is exhausted.
    Dead,
}

impl HeartbeatPhase {
    /// Lowercase name used in logs and the admin API.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Alive => "alive",
            Self::AwaitingPong => "awaiting_pong",
            Self::Dead => "dead",
        }
    }
}

/// Per-session heartbeat counters and the pong signal channel.
///
/// `retry_times` is `None` when heartbeat is disabled for the session; such
/// a session is never reported dead.
#[derive(Debug)]
pub struct HeartbeatState {
    retry_times: Option<u32>,
    failed: AtomicU32,
    phase: Mutex<HeartbeatPhase>,
    pong_tx: mpsc::Sender<()>,
    pong_rx: Mutex<Option<mpsc::Receiver<()>>>,
}

impl HeartbeatState {
    /// Creates the state with the given retry budget.
    #[must_use]
    pub fn new(retry_times: Option<u32>) -> Self {
        // A single pending signal is enough: pongs are idempotent.
        let (pong_tx, pong_rx) = mpsc::channel(1);
        Self {
            retry_times,
            failed: AtomicU32::new(0),
            phase: Mutex::new(HeartbeatPhase::Alive),
            pong_tx,
            pong_rx: Mutex::new(Some(pong_rx)),
        }
    }

    /// Records that a pong arrived.
    ///
    /// Never blocks. Returns `false` when a signal is already pending (the
    /// new one is dropped) or no monitor can ever consume it.
    pub fn signal_pong(&self) -> bool {
        self.pong_tx.try_send(()).is_ok()
    }

    /// Configured retry budget, `None` when heartbeat is disabled.
    #[must_use]
    pub fn retry_times(&self) -> Option<u32> {
        self.retry_times
    }

    /// Consecutive ticks that passed without a pong.
    #[must_use]
    pub fn failed_checks(&self) -> u32 {
        self.failed.load(Ordering::Acquire)
    }

    /// Current liveness phase.
    #[must_use]
    pub fn phase(&self) -> HeartbeatPhase {
        *self.phase.lock()
    }

    /// `true` once the failed-check counter reaches the retry budget.
    ///
    /// A zero budget reports dead immediately; configuration refuses to
    /// enable heartbeat with a zero budget. Disabled heartbeat is never dead.
    #[must_use]
    pub fn is_dead(&self) -> bool {
        self.retry_times
            .is_some_and(|budget| self.failed_checks() >= budget)
    }

    pub(crate) fn take_receiver(&self) -> Option<mpsc::Receiver<()>> {
        self.pong_rx.lock().take()
    }

    fn set_phase(&self, phase: HeartbeatPhase) {
        *self.phase.lock() = phase;
    }

    fn record_miss(&self) -> u32 {
        self.failed.fetch_add(1, Ordering::AcqRel).saturating_add(1)
    }

    fn reset(&self) {
        self.failed.store(0, Ordering::Release);
        self.set_phase(HeartbeatPhase::Alive);
    }
}

/// Timing of the heartbeat loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatSettings {
    /// Tick period; a tick without a pong counts as one failed check.
    pub interval: Duration,
    /// Pause after a pong before the next ping.
    pub cooldown: Duration,
}

impl Default for HeartbeatSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            cooldown: Duration::from_secs(1),
        }
    }
}

/// Outcome of the heartbeat loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatResult {
    /// The retry budget was exhausted.
    Dead,
    /// The session closed first.
    Cancelled,
    /// Heartbeat is disabled for the session, or a monitor already ran.
    Unavailable,
}

/// Runs the ping/pong state machine for one session.
///
/// Sends an initial ping and waits. A pong before the next tick resets the
/// failed-check counter, and after `cooldown` another ping goes out. Each
/// tick without a pong counts a failure and re-pings until the counter
/// reaches the retry budget, at which point the session is marked
/// [`HeartbeatPhase::Dead`] and the loop returns. The transport is left
/// open; disconnect policy belongs to the caller.
pub async fn run_heartbeat(session: Arc<Session>, settings: HeartbeatSettings) -> HeartbeatResult {
    let state = session.heartbeat();
    let Some(budget) = state.retry_times() else {
        return HeartbeatResult::Unavailable;
    };
    let Some(mut pongs) = state.take_receiver() else {
        return HeartbeatResult::Unavailable;
    };
    let closed = session.close_token();

    if state.is_dead() {
        state.set_phase(HeartbeatPhase::Dead);
        return HeartbeatResult::Dead;
    }

    send_ping(&session).await;
    let mut ticker = time::interval_at(Instant::now() + settings.interval, settings.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = closed.cancelled() => return HeartbeatResult::Cancelled,
            Some(()) = pongs.recv() => {
                state.reset();
                tokio::select! {
                    () = closed.cancelled() => return HeartbeatResult::Cancelled,
                    () = time::sleep(settings.cooldown) => {}
                }
                send_ping(&session).await;
                ticker.reset();
            }
            _ = ticker.tick() => {
                let failed = state.record_miss();
                if failed >= budget {
                    state.set_phase(HeartbeatPhase::Dead);
                    tracing::debug!(session_id = %session.id(), failed, "heartbeat budget exhausted");
                    return HeartbeatResult::Dead;
                }
                send_ping(&session).await;
            }
        }
    }
}

async fn send_ping(session: &Session) {
    session.heartbeat().set_phase(HeartbeatPhase::AwaitingPong);
    if let Err(e) = session.send(&Message::ping()).await {
        tracing::debug!(session_id = %session.id(), error = %e, "heartbeat ping failed");
    }
}
