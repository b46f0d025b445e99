//! Periodic tick source
//!
//! A [`ProgressClock`] never touches player state itself. Each tick is posted
//! to the owning player's mailbox and handled on the owner task, so a tick
//! that was already queued when the clock stopped can still arrive; handlers
//! check [`ProgressClock::is_running`] before acting on it.

use crate::mailbox::{Mailbox, PlayerMessage};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, trace};

/// Posts a tick message to a mailbox at a fixed interval while running
#[derive(Debug)]
pub struct ProgressClock {
    name: &'static str,
    interval: Duration,
    mailbox: Mailbox,
    tick: fn() -> PlayerMessage,
    task: Option<JoinHandle<()>>,
}

impl ProgressClock {
    pub fn new(
        name: &'static str,
        interval: Duration,
        mailbox: Mailbox,
        tick: fn() -> PlayerMessage,
    ) -> Self {
        Self {
            name,
            interval,
            mailbox,
            tick,
            task: None,
        }
    }

    /// Start ticking; the first tick fires one interval from now.
    ///
    /// Must be called from within a tokio runtime. Starting a running clock
    /// is a no-op.
    pub fn start(&mut self) {
        if self.is_running() {
            return;
        }
        debug!(clock = self.name, interval_ms = self.interval.as_millis() as u64, "Clock started");

        let interval = self.interval;
        let mailbox = self.mailbox.clone();
        let tick = self.tick;
        let name = self.name;
        self.task = Some(tokio::spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if !mailbox.post(tick()) {
                    trace!(clock = name, "Mailbox closed, clock exiting");
                    break;
                }
            }
        }));
    }

    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            debug!(clock = self.name, "Clock stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Change the interval, restarting the clock if it was running
    pub fn set_interval(&mut self, interval: Duration) {
        if self.interval == interval {
            return;
        }
        self.interval = interval;
        if self.is_running() {
            self.stop();
            self.start();
        }
    }
}

impl Drop for ProgressClock {
    fn drop(&mut self) {
        self.stop();
    }
}
