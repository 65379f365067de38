//! Session recording and CSV export.

use crate::domain::models::AccelSample;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

pub const CSV_HEADER: &str = "timestamp_ms,x,y,z";

/// A sample stamped with milliseconds since the recording started.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecordedSample {
    pub timestamp_ms: u64,
    pub sample: AccelSample,
}

/// Append-only buffer of samples for the current recording.
#[derive(Debug, Default)]
pub struct Recorder {
    started_at: Option<Instant>,
    samples: Vec<RecordedSample>,
    total_received: u64,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin a new recording, discarding the previous one.
    pub fn start(&mut self, now: Instant) {
        self.samples.clear();
        self.started_at = Some(now);
    }

    pub fn stop(&mut self) {
        self.started_at = None;
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    pub fn is_recording(&self) -> bool {
        self.started_at.is_some()
    }

    /// Count every accepted sample; store it when recording.
    pub fn observe(&mut self, sample: AccelSample, now: Instant) {
        self.total_received += 1;
        if let Some(started_at) = self.started_at {
            let elapsed = now.saturating_duration_since(started_at);
            self.samples.push(RecordedSample {
                timestamp_ms: elapsed.as_millis() as u64,
                sample,
            });
        }
    }

    pub fn samples(&self) -> &[RecordedSample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn total_received(&self) -> u64 {
        self.total_received
    }
}

/// Rate limiter for display updates. Samples arriving faster than the
/// interval are merged: only the latest refused one is kept, and it is
/// released by the next admitted offer or by [`DisplayThrottle::flush`].
#[derive(Debug, Clone)]
pub struct DisplayThrottle {
    interval: Duration,
    last_emit: Option<Instant>,
    pending: Option<AccelSample>,
}

impl DisplayThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_emit: None,
            pending: None,
        }
    }

    fn is_due(&self, now: Instant) -> bool {
        self.last_emit
            .map_or(true, |last| now.saturating_duration_since(last) >= self.interval)
    }

    /// Returns the sample to display now, or parks it until the interval ends.
    pub fn offer(&mut self, sample: AccelSample, now: Instant) -> Option<AccelSample> {
        if self.is_due(now) {
            self.last_emit = Some(now);
            self.pending = None;
            Some(sample)
        } else {
            self.pending = Some(sample);
            None
        }
    }

    /// Release the parked sample once the interval has passed.
    pub fn flush(&mut self, now: Instant) -> Option<AccelSample> {
        if self.pending.is_some() && self.is_due(now) {
            self.last_emit = Some(now);
            self.pending.take()
        } else {
            None
        }
    }

    /// When the parked sample becomes displayable, if there is one.
    pub fn flush_at(&self) -> Option<Instant> {
        if self.pending.is_none() {
            return None;
        }
        self.last_emit.map(|last| last + self.interval)
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Forget timing and any parked sample, e.g. when a new stream starts.
    pub fn reset(&mut self) {
        self.last_emit = None;
        self.pending = None;
    }
}

/// Serialize samples as `timestamp_ms,x,y,z` rows.
pub fn write_csv<W: Write>(samples: &[RecordedSample], mut writer: W) -> io::Result<()> {
    writeln!(writer, "{}", CSV_HEADER)?;
    for row in samples {
        writeln!(
            writer,
            "{},{},{},{}",
            row.timestamp_ms, row.sample.x, row.sample.y, row.sample.z
        )?;
    }
    writer.flush()
}

/// Write a recording into `dir` as `accel_<unix_ms>.csv`.
pub fn export_csv(samples: &[RecordedSample], dir: &Path) -> anyhow::Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let stamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    let path = dir.join(format!("accel_{}.csv", stamp));
    let file = fs::File::create(&path)?;
    write_csv(samples, io::BufWriter::new(file))?;
    tracing::info!("Exported {} samples to {}", samples.len(), path.display());
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recorder_only_stores_while_recording() {
        let t0 = Instant::now();
        let mut recorder = Recorder::new();
        recorder.observe(AccelSample::new(1.0, 0.0, 0.0), t0);
        assert!(recorder.is_empty());

        recorder.start(t0);
        recorder.observe(AccelSample::new(0.0, 1.0, 0.0), t0 + Duration::from_millis(5));
        recorder.observe(AccelSample::new(0.0, 0.0, 1.0), t0 + Duration::from_millis(12));
        recorder.stop();
        recorder.observe(AccelSample::new(1.0, 1.0, 1.0), t0 + Duration::from_millis(20));

        assert_eq!(recorder.len(), 2);
        assert_eq!(recorder.total_received(), 4);
        assert_eq!(recorder.samples()[0].timestamp_ms, 5);
        assert_eq!(recorder.samples()[1].timestamp_ms, 12);
    }

    #[test]
    fn test_restart_discards_previous_recording() {
        let t0 = Instant::now();
        let mut recorder = Recorder::new();
        recorder.start(t0);
        recorder.observe(AccelSample::ZERO, t0);
        recorder.start(t0 + Duration::from_secs(1));
        assert!(recorder.is_empty());
        assert!(recorder.is_recording());
    }

    #[test]
    fn test_throttle_keeps_latest_refused_sample() {
        let t0 = Instant::now();
        let ms = Duration::from_millis;
        let mut throttle = DisplayThrottle::new(ms(33));
        let a = AccelSample::new(1.0, 0.0, 0.0);
        let b = AccelSample::new(2.0, 0.0, 0.0);
        let c = AccelSample::new(3.0, 0.0, 0.0);

        assert_eq!(throttle.offer(a, t0), Some(a));
        assert_eq!(throttle.offer(b, t0 + ms(10)), None);
        assert_eq!(throttle.offer(c, t0 + ms(20)), None);
        assert_eq!(throttle.flush_at(), Some(t0 + ms(33)));
        assert_eq!(throttle.flush(t0 + ms(32)), None);
        assert_eq!(throttle.flush(t0 + ms(33)), Some(c));
        assert!(!throttle.has_pending());
        assert_eq!(throttle.flush(t0 + ms(500)), None);
    }

    #[test]
    fn test_admitted_offer_supersedes_pending() {
        let t0 = Instant::now();
        let ms = Duration::from_millis;
        let mut throttle = DisplayThrottle::new(ms(33));
        let a = AccelSample::new(1.0, 0.0, 0.0);
        let b = AccelSample::new(2.0, 0.0, 0.0);

        throttle.offer(a, t0);
        throttle.offer(a, t0 + ms(5));
        assert_eq!(throttle.offer(b, t0 + ms(40)), Some(b));
        assert_eq!(throttle.flush_at(), None);
    }

    #[test]
    fn test_throttle_reset_drops_pending() {
        let t0 = Instant::now();
        let ms = Duration::from_millis;
        let mut throttle = DisplayThrottle::new(ms(33));
        let a = AccelSample::new(1.0, 0.0, 0.0);

        throttle.offer(a, t0);
        throttle.offer(a, t0 + ms(1));
        throttle.reset();
        assert!(!throttle.has_pending());
        assert_eq!(throttle.offer(a, t0 + ms(2)), Some(a));
    }

    #[test]
    fn test_csv_format() {
        let samples = vec![
            RecordedSample {
                timestamp_ms: 0,
                sample: AccelSample::new(1.0, -0.5, 0.25),
            },
            RecordedSample {
                timestamp_ms: 20,
                sample: AccelSample::new(0.0, 0.0, 1.5),
            },
        ];
        let mut out = Vec::new();
        write_csv(&samples, &mut out).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "timestamp_ms,x,y,z\n0,1,-0.5,0.25\n20,0,0,1.5\n"
        );
    }

    #[test]
    fn test_export_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let samples = vec![RecordedSample {
            timestamp_ms: 7,
            sample: AccelSample::new(0.5, 0.5, 0.5),
        }];
        let path = export_csv(&samples, &dir.path().join("out")).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(text, "timestamp_ms,x,y,z\n7,0.5,0.5,0.5\n");
        assert!(path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with("accel_") && n.ends_with(".csv")));
    }
}
