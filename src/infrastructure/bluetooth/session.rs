//! Streaming session plumbing shared by real and simulated sources.

use crate::domain::decoder;
use crate::domain::error::StreamError;
use crate::domain::models::{AccelSample, AppEvent};
use crate::domain::recording::{DisplayThrottle, Recorder};
use crate::infrastructure::bluetooth::platform::Subscription;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, trace};
use uuid::Uuid;

/// Receives decoded samples and streaming failures.
pub trait SampleSink: Send + Sync {
    fn on_sample(&self, sample: AccelSample);
    fn on_error(&self, error: StreamError);

    /// Called before a new stream starts feeding this sink.
    fn on_stream_started(&self) {}
}

/// Anything that can feed a [`SampleSink`] until cancelled.
#[async_trait]
pub trait SampleSource: Send {
    /// Run until the source ends or fails. Aborting the task stops it.
    async fn stream(&mut self, sink: Arc<dyn SampleSink>) -> Result<(), StreamError>;

    fn describe(&self) -> String;
}

/// A subscription that has produced data, plus its payload queue.
pub struct LiveStream {
    pub subscription: Subscription,
    pub payloads: mpsc::UnboundedReceiver<Vec<u8>>,
}

/// Holds at most one live subscription for a connection.
#[derive(Default)]
pub struct StreamingSession {
    active: Option<LiveStream>,
}

impl StreamingSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    pub fn active_characteristic(&self) -> Option<Uuid> {
        self.active.as_ref().map(|live| live.subscription.characteristic())
    }

    /// Replace the live subscription, releasing the previous one first.
    pub fn activate(&mut self, live: LiveStream) {
        self.release();
        self.active = Some(live);
    }

    pub fn release(&mut self) {
        if let Some(live) = self.active.take() {
            live.subscription.release();
        }
    }

    /// Decode payloads from the live subscription until it closes.
    pub async fn pump(&mut self, sink: &dyn SampleSink, log_raw: bool) {
        let Some(live) = self.active.as_mut() else {
            return;
        };
        while let Some(bytes) = live.payloads.recv().await {
            if log_raw {
                trace!("Payload ({} bytes): {:02X?}", bytes.len(), bytes);
            }
            if decoder::is_noise(&bytes) {
                continue;
            }
            sink.on_sample(decoder::decode(&bytes));
        }
        debug!("Notification stream closed");
    }
}

/// Sink that records every sample and forwards a throttled subset to the UI.
///
/// A sample refused by the throttle is parked and delivered by a one-shot
/// flush timer, so the display always ends on the newest reading.
pub struct SessionSink {
    events: mpsc::UnboundedSender<AppEvent>,
    recorder: Arc<Mutex<Recorder>>,
    throttle: Arc<Mutex<DisplayThrottle>>,
    flush_scheduled: Arc<AtomicBool>,
}

impl SessionSink {
    pub fn new(
        events: mpsc::UnboundedSender<AppEvent>,
        recorder: Arc<Mutex<Recorder>>,
        display_interval: Duration,
    ) -> Self {
        Self {
            events,
            recorder,
            throttle: Arc::new(Mutex::new(DisplayThrottle::new(display_interval))),
            flush_scheduled: Arc::new(AtomicBool::new(false)),
        }
    }

    fn schedule_flush(&self, at: std::time::Instant) {
        if self.flush_scheduled.swap(true, Ordering::AcqRel) {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            self.flush_scheduled.store(false, Ordering::Release);
            return;
        };

        let throttle = self.throttle.clone();
        let scheduled = self.flush_scheduled.clone();
        let events = self.events.clone();
        runtime.spawn(async move {
            let mut at = at;
            loop {
                tokio::time::sleep_until(tokio::time::Instant::from_std(at)).await;
                let now = tokio::time::Instant::now().into_std();
                let (flushed, next) = match throttle.lock() {
                    Ok(mut throttle) => {
                        let flushed = throttle.flush(now);
                        let next = throttle.flush_at();
                        if next.is_none() {
                            scheduled.store(false, Ordering::Release);
                        }
                        (flushed, next)
                    }
                    Err(_) => {
                        scheduled.store(false, Ordering::Release);
                        (None, None)
                    }
                };
                if let Some(sample) = flushed {
                    let _ = events.send(AppEvent::Sample(sample));
                }
                match next {
                    Some(next) => at = next,
                    None => break,
                }
            }
        });
    }
}

impl SampleSink for SessionSink {
    fn on_sample(&self, sample: AccelSample) {
        let now = tokio::time::Instant::now().into_std();
        if let Ok(mut recorder) = self.recorder.lock() {
            recorder.observe(sample, now);
        }

        let (shown, flush_at) = match self.throttle.lock() {
            Ok(mut throttle) => {
                let shown = throttle.offer(sample, now);
                (shown, throttle.flush_at())
            }
            Err(_) => (Some(sample), None),
        };
        if let Some(sample) = shown {
            let _ = self.events.send(AppEvent::Sample(sample));
        }
        if let Some(at) = flush_at {
            self.schedule_flush(at);
        }
    }

    fn on_error(&self, error: StreamError) {
        let _ = self.events.send(AppEvent::Error(error));
    }

    fn on_stream_started(&self) {
        if let Ok(mut throttle) = self.throttle.lock() {
            throttle.reset();
        }
    }
}
