//! Cooldown governor
//!
//! Owns the cooldown counter. `arm(n)` replaces the remaining duration and
//! spawns a one-second ticker task; ticks travel through the controller's
//! channel and are applied with [`CooldownGovernor::on_tick`]. Each arm gets a
//! new generation so ticks from a replaced ticker are ignored.

use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::model::CooldownState;

pub const TICK_PERIOD: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CooldownTick {
    pub generation: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickResult {
    /// Tick from a cancelled or replaced ticker
    Stale,
    Counting(u32),
    Expired,
}

pub struct CooldownGovernor {
    state: CooldownState,
    generation: u64,
    ticker: Option<JoinHandle<()>>,
    tick_tx: mpsc::Sender<CooldownTick>,
    state_tx: watch::Sender<CooldownState>,
}

impl CooldownGovernor {
    pub fn new(tick_tx: mpsc::Sender<CooldownTick>) -> Self {
        let (state_tx, _) = watch::channel(CooldownState::default());
        Self {
            state: CooldownState::default(),
            generation: 0,
            ticker: None,
            tick_tx,
            state_tx,
        }
    }

    pub fn state(&self) -> CooldownState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state.active
    }

    pub fn subscribe(&self) -> watch::Receiver<CooldownState> {
        self.state_tx.subscribe()
    }

    /// Start (or restart) the countdown. The latest duration wins; durations
    /// are never summed. `arm(0)` clears the cooldown.
    pub fn arm(&mut self, seconds: u32) {
        self.cancel_ticker();
        if seconds == 0 {
            self.set_state(CooldownState::default());
            return;
        }

        self.generation += 1;
        self.set_state(CooldownState { remaining_seconds: seconds, active: true });
        self.ticker = Some(spawn_ticker(self.generation, self.tick_tx.clone()));
        info!("Cooldown armed for {}s", seconds);
    }

    pub fn on_tick(&mut self, tick: CooldownTick) -> TickResult {
        if tick.generation != self.generation || !self.state.active {
            return TickResult::Stale;
        }

        let remaining = self.state.remaining_seconds.saturating_sub(1);
        if remaining == 0 {
            self.cancel_ticker();
            self.set_state(CooldownState::default());
            debug!("Cooldown expired");
            TickResult::Expired
        } else {
            self.set_state(CooldownState { remaining_seconds: remaining, active: true });
            TickResult::Counting(remaining)
        }
    }

    /// Stop ticking and clear the counter
    pub fn cancel(&mut self) {
        self.cancel_ticker();
        if self.state.active {
            debug!("Cooldown cancelled with {}s left", self.state.remaining_seconds);
        }
        self.set_state(CooldownState::default());
    }

    fn cancel_ticker(&mut self) {
        if let Some(handle) = self.ticker.take() {
            handle.abort();
        }
        // Any tick already queued from the old ticker becomes stale
        self.generation += 1;
    }

    fn set_state(&mut self, state: CooldownState) {
        self.state = state;
        self.state_tx.send_replace(state);
    }
}

impl Drop for CooldownGovernor {
    fn drop(&mut self) {
        if let Some(handle) = self.ticker.take() {
            handle.abort();
        }
    }
}

fn spawn_ticker(generation: u64, tick_tx: mpsc::Sender<CooldownTick>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut timer = interval_at(Instant::now() + TICK_PERIOD, TICK_PERIOD);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            timer.tick().await;
            if tick_tx.send(CooldownTick { generation }).await.is_err() {
                break;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn next_tick(rx: &mut mpsc::Receiver<CooldownTick>) -> CooldownTick {
        tokio::time::advance(TICK_PERIOD).await;
        rx.recv().await.unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_counts_down_to_expiry() {
        let (tx, mut rx) = mpsc::channel(4);
        let mut governor = CooldownGovernor::new(tx);
        let watcher = governor.subscribe();

        governor.arm(3);
        assert_eq!(*watcher.borrow(), CooldownState { remaining_seconds: 3, active: true });

        let t = next_tick(&mut rx).await;
        assert_eq!(governor.on_tick(t), TickResult::Counting(2));
        let t = next_tick(&mut rx).await;
        assert_eq!(governor.on_tick(t), TickResult::Counting(1));
        let t = next_tick(&mut rx).await;
        assert_eq!(governor.on_tick(t), TickResult::Expired);

        assert!(!governor.is_active());
        assert_eq!(*watcher.borrow(), CooldownState::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearm_replaces_never_sums() {
        let (tx, _rx) = mpsc::channel(4);
        let mut governor = CooldownGovernor::new(tx);

        governor.arm(5);
        governor.arm(2);
        assert_eq!(governor.state(), CooldownState { remaining_seconds: 2, active: true });
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticks_from_replaced_ticker_are_stale() {
        let (tx, mut rx) = mpsc::channel(4);
        let mut governor = CooldownGovernor::new(tx);

        governor.arm(5);
        let old = next_tick(&mut rx).await;
        governor.arm(5);

        assert_eq!(governor.on_tick(old), TickResult::Stale);
        assert_eq!(governor.state().remaining_seconds, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_ticking() {
        let (tx, mut rx) = mpsc::channel(4);
        let mut governor = CooldownGovernor::new(tx);

        governor.arm(5);
        governor.cancel();
        assert!(!governor.is_active());

        tokio::time::advance(Duration::from_secs(3)).await;
        tokio::task::yield_now().await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_arm_zero_clears() {
        let (tx, _rx) = mpsc::channel(4);
        let mut governor = CooldownGovernor::new(tx);
        governor.arm(4);
        governor.arm(0);
        assert_eq!(governor.state(), CooldownState::default());
    }
}
