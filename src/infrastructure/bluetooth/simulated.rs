//! Synthetic sample source used when no real peripheral is available.

use crate::domain::error::StreamError;
use crate::domain::models::AccelSample;
use crate::infrastructure::bluetooth::session::{SampleSink, SampleSource};
use async_trait::async_trait;
use std::f32::consts::TAU;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;

/// Slow circular tilt with a small vertical bounce on top of 1 g.
pub fn sample_at(t: f32) -> AccelSample {
    AccelSample::new(
        0.5 * (TAU * 0.5 * t).sin(),
        0.5 * (TAU * 0.5 * t).cos(),
        1.0 + 0.1 * (TAU * 2.0 * t).sin(),
    )
}

pub struct SineWaveSource {
    rate_hz: u32,
}

impl SineWaveSource {
    pub fn new(rate_hz: u32) -> Self {
        Self {
            rate_hz: rate_hz.max(1),
        }
    }
}

#[async_trait]
impl SampleSource for SineWaveSource {
    async fn stream(&mut self, sink: Arc<dyn SampleSink>) -> Result<(), StreamError> {
        let period = Duration::from_secs_f64(1.0 / f64::from(self.rate_hz));
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut n: u64 = 0;
        loop {
            ticker.tick().await;
            sink.on_sample(sample_at(n as f32 / self.rate_hz as f32));
            n += 1;
        }
    }

    fn describe(&self) -> String {
        format!("simulated accelerometer at {} Hz", self.rate_hz)
    }
}
