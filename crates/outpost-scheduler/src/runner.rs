//! Periodic driver for a [`TickProcessor`].
//!
//! Ticks arrive on a `crossbeam_channel::tick` ticker, which holds at most
//! one pending tick: if a tick runs long, missed intervals are dropped
//! rather than replayed back to back.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Sender, bounded, select, tick};
use tracing::{info, warn};

use crate::tick::{TickOutcome, TickProcessor};

pub struct TickRunner {
    shutdown: Option<Sender<()>>,
    handle: Option<JoinHandle<u64>>,
}

impl TickRunner {
    /// Start ticking `processor` every `interval` on a dedicated thread.
    pub fn spawn(processor: Arc<TickProcessor>, interval: Duration) -> std::io::Result<Self> {
        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);
        let handle = thread::Builder::new()
            .name("outpost-tick".to_string())
            .spawn(move || {
                let ticker = tick(interval);
                let mut ran = 0u64;
                info!(
                    target: "outpost::runner",
                    interval_ms = interval.as_millis() as u64,
                    "runner.started"
                );
                loop {
                    select! {
                        recv(ticker) -> _ => match processor.tick() {
                            Ok(TickOutcome::Ran(_)) => ran += 1,
                            Ok(TickOutcome::Skipped) => {}
                            Err(e) => {
                                warn!(target: "outpost::runner", error = %e, "runner.tick_failed")
                            }
                        },
                        recv(shutdown_rx) -> _ => break,
                    }
                }
                info!(target: "outpost::runner", ticks = ran, "runner.stopped");
                ran
            })?;
        Ok(Self {
            shutdown: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    /// Stop the thread and wait for the tick in progress, if any. Returns
    /// the number of ticks the runner completed.
    pub fn shutdown(mut self) -> u64 {
        self.stop()
    }

    fn stop(&mut self) -> u64 {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        match self.handle.take() {
            Some(handle) => handle.join().unwrap_or_else(|_| {
                warn!(target: "outpost::runner", "runner.thread_panicked");
                0
            }),
            None => 0,
        }
    }
}

impl Drop for TickRunner {
    fn drop(&mut self) {
        self.stop();
    }
}
