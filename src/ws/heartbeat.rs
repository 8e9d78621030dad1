//! Application-level liveness detection.
//!
//! Transports behind NATs and mobile carriers often die without a close frame or an I/O
//! error. The monitor probes the peer on its own task, so it keeps running even when the
//! listener or the state machine is slow.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at, sleep_until};
use tokio_util::sync::CancellationToken;

/// What the monitor asks of the connection that owns it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HeartbeatSignal {
    /// Time to send a probe frame
    Probe,
    /// A reply arrived and cleared a non-zero failure count
    Recovered,
    /// A probe went unanswered; carries the consecutive failure count
    Missed { failures: u32 },
    /// The failure count reached the limit: treat the connection as dead
    Expired { failures: u32 },
}

/// Handle to a running monitor. Dropping it stops the monitor.
pub(crate) struct HeartbeatMonitor {
    token: CancellationToken,
    reply_tx: mpsc::UnboundedSender<()>,
    handle: JoinHandle<()>,
}

impl HeartbeatMonitor {
    /// Start probing every `period`. `emit` returns `false` once nobody listens, which
    /// ends the monitor.
    pub(crate) fn start<F>(
        period: Duration,
        max_failures: u32,
        token: CancellationToken,
        emit: F,
    ) -> Self
    where
        F: Fn(HeartbeatSignal) -> bool + Send + 'static,
    {
        let (reply_tx, reply_rx) = mpsc::unbounded_channel();
        let task_token = token.clone();

        let handle = tokio::spawn(async move {
            Self::run(period, max_failures.max(1), task_token, reply_rx, emit).await;
        });

        Self {
            token,
            reply_tx,
            handle,
        }
    }

    /// Record a liveness reply.
    pub(crate) fn acknowledge(&self) {
        _ = self.reply_tx.send(());
    }

    /// Cancel every pending probe and check. Nothing fires after this returns.
    pub(crate) fn stop(&self) {
        self.token.cancel();
        self.handle.abort();
    }

    async fn run<F>(
        period: Duration,
        max_failures: u32,
        token: CancellationToken,
        mut reply_rx: mpsc::UnboundedReceiver<()>,
        emit: F,
    ) where
        F: Fn(HeartbeatSignal) -> bool,
    {
        let mut probes = interval_at(Instant::now() + period, period);
        probes.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut failures = 0_u32;
        let mut check_at: Option<Instant> = None;

        loop {
            let deadline = check_at;
            let check = async move {
                match deadline {
                    Some(deadline) => sleep_until(deadline).await,
                    None => std::future::pending().await,
                }
            };

            // A check due at the same instant as the next probe must be settled first
            tokio::select! {
                biased;

                () = token.cancelled() => break,

                Some(()) = reply_rx.recv() => {
                    check_at = None;
                    if failures > 0 {
                        failures = 0;
                        if !emit(HeartbeatSignal::Recovered) {
                            break;
                        }
                    }
                }

                () = check => {
                    check_at = None;
                    failures = failures.saturating_add(1);

                    #[cfg(feature = "tracing")]
                    tracing::warn!(failures, "Heartbeat reply missing");

                    if failures >= max_failures {
                        _ = emit(HeartbeatSignal::Expired { failures });
                        break;
                    }
                    if !emit(HeartbeatSignal::Missed { failures }) {
                        break;
                    }
                }

                _ = probes.tick() => {
                    if !emit(HeartbeatSignal::Probe) {
                        break;
                    }
                    check_at = Some(Instant::now() + period);
                }
            }
        }
    }
}

impl Drop for HeartbeatMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}
