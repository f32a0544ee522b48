//! Timed fetch engine shared by the vessel and route streams.
//!
//! A tick is skipped (not queued) while the stream is paused, while the
//! previous fetch of the same stream is still in flight, or while no service
//! URL is configured. Failures go to the stream's error sink and the next tick
//! simply tries again.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use metrics::counter;
use reqwest::Url;
use tokio::{
    task::JoinHandle,
    time::{MissedTickBehavior, interval},
};
use tracing::{Instrument, debug, info_span, warn};

use crate::{error::SyncError, settings::SettingsStore};

/// Shared pause switch consulted on every tick.
#[derive(Clone, Debug, Default)]
pub struct PauseFlag(Arc<AtomicBool>);

impl PauseFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, paused: bool) {
        self.0.store(paused, Ordering::SeqCst);
    }

    pub fn pause(&self) {
        self.set(true);
    }

    pub fn resume(&self) {
        self.set(false);
    }

    pub fn is_paused(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// One logical stream: fetch from the service and apply the result.
#[async_trait]
pub trait PollSource: Send + Sync + 'static {
    async fn poll(&self, base: Url) -> Result<(), SyncError>;

    /// Error sink for failed polls.
    fn report(&self, _error: &SyncError) {}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SkipReason {
    Paused,
    InFlight,
    Unconfigured,
}

impl SkipReason {
    fn label(self) -> &'static str {
        match self {
            SkipReason::Paused => "paused",
            SkipReason::InFlight => "in_flight",
            SkipReason::Unconfigured => "unconfigured",
        }
    }
}

#[derive(Debug)]
pub enum Tick {
    /// A fetch was started; the handle resolves once its result is applied.
    Dispatched(JoinHandle<()>),
    Skipped(SkipReason),
}

impl Tick {
    pub fn skipped(&self) -> Option<SkipReason> {
        match self {
            Tick::Dispatched(_) => None,
            Tick::Skipped(reason) => Some(*reason),
        }
    }

    /// Wait for a dispatched fetch to finish. No-op for skipped ticks.
    pub async fn settle(self) {
        if let Tick::Dispatched(handle) = self {
            let _ = handle.await;
        }
    }
}

pub struct Poller {
    stream: &'static str,
    source: Arc<dyn PollSource>,
    settings: Arc<SettingsStore>,
    pause: PauseFlag,
    in_flight: Arc<AtomicBool>,
}

struct InFlightGuard(Arc<AtomicBool>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl Poller {
    pub fn new(
        stream: &'static str,
        source: Arc<dyn PollSource>,
        settings: Arc<SettingsStore>,
        pause: PauseFlag,
    ) -> Self {
        Self {
            stream,
            source,
            settings,
            pause,
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Run one tick. Must be called from within a tokio runtime.
    pub fn tick(&self) -> Tick {
        if self.pause.is_paused() {
            return self.skip(SkipReason::Paused);
        }
        if self.in_flight.load(Ordering::SeqCst) {
            return self.skip(SkipReason::InFlight);
        }
        let base = match self.settings.get().base_url() {
            Ok(base) => base,
            Err(SyncError::Unconfigured) => {
                debug!(stream = self.stream, "no service URL configured; skipping poll");
                return self.skip(SkipReason::Unconfigured);
            }
            Err(err) => {
                warn!(stream = self.stream, "skipping poll: {err}");
                return self.skip(SkipReason::Unconfigured);
            }
        };

        self.in_flight.store(true, Ordering::SeqCst);
        let guard = InFlightGuard(self.in_flight.clone());
        let source = self.source.clone();
        let stream = self.stream;
        let span = info_span!("rawcat.poll", stream, base = %base);
        let handle = tokio::spawn(
            async move {
                let result = source.poll(base).await;
                drop(guard);
                match result {
                    Ok(()) => {
                        counter!("rawcat_poll_ticks_total", "stream" => stream, "outcome" => "ok")
                            .increment(1);
                    }
                    Err(err) => {
                        counter!(
                            "rawcat_poll_ticks_total",
                            "stream" => stream,
                            "outcome" => err.kind()
                        )
                        .increment(1);
                        warn!(stream, "poll failed: {err}");
                        source.report(&err);
                    }
                }
            }
            .instrument(span),
        );
        Tick::Dispatched(handle)
    }

    fn skip(&self, reason: SkipReason) -> Tick {
        counter!(
            "rawcat_poll_ticks_total",
            "stream" => self.stream,
            "outcome" => reason.label()
        )
        .increment(1);
        Tick::Skipped(reason)
    }

    /// Tick on a fixed cadence until the returned handle is stopped or
    /// dropped. The first tick fires immediately.
    pub fn start(self, period: Duration) -> PollHandle {
        let stream = self.stream;
        let task = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let _ = self.tick();
            }
        });
        debug!(stream, ?period, "poller started");
        PollHandle { stream, task }
    }
}

/// Owns a running poll timer. Stopping it never cancels a fetch that is
/// already in flight; that result still lands.
pub struct PollHandle {
    stream: &'static str,
    task: JoinHandle<()>,
}

impl PollHandle {
    pub fn stop(self) {
        drop(self);
    }
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        self.task.abort();
        debug!(stream = self.stream, "poller stopped");
    }
}
