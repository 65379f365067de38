//! BLE Scanner Module
//!
//! Runs bounded discovery windows. Reports are de-duplicated by identifier
//! and, when a window ends empty-handed, the simulated device is offered
//! so the rest of the app stays usable without hardware.

use crate::domain::error::StreamError;
use crate::domain::models::{AppEvent, DiscoveredDevice, MessageSeverity, StatusMessage};
use crate::infrastructure::bluetooth::platform::{Advertisement, BlePlatform};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub struct ScanController {
    platform: Arc<dyn BlePlatform>,
    event_sender: mpsc::UnboundedSender<AppEvent>,
    devices: Arc<Mutex<Vec<DiscoveredDevice>>>,
    window: Option<JoinHandle<()>>,
}

impl ScanController {
    pub fn new(platform: Arc<dyn BlePlatform>, event_sender: mpsc::UnboundedSender<AppEvent>) -> Self {
        Self {
            platform,
            event_sender,
            devices: Arc::new(Mutex::new(Vec::new())),
            window: None,
        }
    }

    /// Start a fresh scan window. Any running window is stopped first and
    /// the device list is cleared. Radio and permission problems fail here
    /// rather than after the window.
    pub async fn start_scan(
        &mut self,
        window: Duration,
        service_filter: Option<&str>,
    ) -> Result<(), StreamError> {
        self.stop_scan().await;
        if let Ok(mut devices) = self.devices.lock() {
            devices.clear();
        }

        let filter = service_filter.and_then(|text| match Uuid::parse_str(text.trim()) {
            Ok(uuid) => Some(uuid),
            Err(e) => {
                warn!("Ignoring invalid scan filter {:?}: {}", text, e);
                None
            }
        });

        info!("Starting BLE scan for {:?} (filter: {:?})", window, filter);
        let adverts = self.platform.start_scan(filter).await.map_err(|e| {
            warn!("Scan failed to start: {}", e);
            StreamError::from(e)
        })?;

        self.send_log("Scanning for devices...", MessageSeverity::Info);
        self.window = Some(tokio::spawn(run_window(
            self.platform.clone(),
            adverts,
            window,
            self.devices.clone(),
            self.event_sender.clone(),
        )));
        Ok(())
    }

    /// Stop the current window early. Safe to call at any time.
    pub async fn stop_scan(&mut self) {
        let Some(window) = self.window.take() else {
            return;
        };
        if window.is_finished() {
            return;
        }
        window.abort();
        info!("Stopping BLE scan...");
        if let Err(e) = self.platform.stop_scan().await {
            debug!("stop_scan: {}", e);
        }
        self.send_log("Scan stopped.", MessageSeverity::Info);
        let _ = self.event_sender.send(AppEvent::ScanFinished);
    }

    pub fn is_scanning(&self) -> bool {
        self.window.as_ref().is_some_and(|w| !w.is_finished())
    }

    pub fn devices(&self) -> Vec<DiscoveredDevice> {
        self.devices
            .lock()
            .map(|devices| devices.clone())
            .unwrap_or_default()
    }

    fn send_log(&self, message: &str, severity: MessageSeverity) {
        let _ = self
            .event_sender
            .send(AppEvent::LogMessage(StatusMessage::new(message, severity)));
    }
}

async fn run_window(
    platform: Arc<dyn BlePlatform>,
    mut adverts: mpsc::UnboundedReceiver<Advertisement>,
    window: Duration,
    devices: Arc<Mutex<Vec<DiscoveredDevice>>>,
    events: mpsc::UnboundedSender<AppEvent>,
) {
    let deadline = tokio::time::sleep(window);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            advert = adverts.recv() => match advert {
                Some(advert) => {
                    if let Some(device) = record(&devices, advert) {
                        debug!("Found {} ({})", device.label(), device.identifier);
                        let _ = events.send(AppEvent::DeviceFound(device));
                    }
                }
                None => {
                    // Backend ended discovery on its own; the window still runs out.
                    (&mut deadline).await;
                    break;
                }
            },
            _ = &mut deadline => break,
        }
    }

    if let Err(e) = platform.stop_scan().await {
        debug!("stop_scan: {}", e);
    }

    let found = devices.lock().map(|d| d.len()).unwrap_or_default();
    if found == 0 {
        info!("Scan found nothing; offering the simulated device");
        let synthetic = DiscoveredDevice::synthetic();
        if let Ok(mut devices) = devices.lock() {
            devices.push(synthetic.clone());
        }
        let _ = events.send(AppEvent::DeviceFound(synthetic));
    } else {
        info!("Scan finished with {} device(s)", found);
    }
    let _ = events.send(AppEvent::ScanFinished);
}

/// Add an advert to the list unless its identifier is already known.
fn record(devices: &Mutex<Vec<DiscoveredDevice>>, advert: Advertisement) -> Option<DiscoveredDevice> {
    let mut devices = devices.lock().ok()?;
    if devices.iter().any(|d| d.identifier == advert.identifier) {
        return None;
    }
    let device = DiscoveredDevice::new(advert.identifier, advert.local_name);
    devices.push(device.clone());
    Some(device)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::bluetooth::fake::FakePlatform;
    use crate::infrastructure::bluetooth::platform::PlatformError;

    fn found(rx: &mut mpsc::UnboundedReceiver<AppEvent>) -> (Vec<DiscoveredDevice>, bool) {
        let mut devices = Vec::new();
        let mut finished = false;
        while let Ok(event) = rx.try_recv() {
            match event {
                AppEvent::DeviceFound(d) => devices.push(d),
                AppEvent::ScanFinished => finished = true,
                _ => {}
            }
        }
        (devices, finished)
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicates_reported_once() {
        let fake = Arc::new(FakePlatform::new());
        fake.add_advert("AA0000000001", Some("Band"));
        fake.add_advert("AA0000000001", Some("Band"));
        fake.add_advert("AA0000000002", None);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut scanner = ScanController::new(fake.clone(), tx);

        scanner.start_scan(Duration::from_secs(10), None).await.unwrap();
        tokio::time::sleep(Duration::from_secs(11)).await;

        let (devices, finished) = found(&mut rx);
        assert!(finished);
        assert_eq!(devices.len(), 2);
        assert_eq!(scanner.devices().len(), 2);
        assert!(!devices.iter().any(|d| d.is_synthetic));
        assert!(!fake.is_scanning());
        assert!(!scanner.is_scanning());
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_window_offers_simulated_device() {
        let fake = Arc::new(FakePlatform::new());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut scanner = ScanController::new(fake, tx);

        scanner.start_scan(Duration::from_secs(10), None).await.unwrap();
        tokio::time::sleep(Duration::from_secs(9)).await;
        assert!(found(&mut rx).0.is_empty());

        tokio::time::sleep(Duration::from_secs(2)).await;
        let (devices, finished) = found(&mut rx);
        assert!(finished);
        assert_eq!(devices, vec![DiscoveredDevice::synthetic()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_radio_off_fails_immediately() {
        let fake = Arc::new(FakePlatform::new());
        fake.fail_scan(PlatformError::PoweredOff("adapter disabled".into()));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut scanner = ScanController::new(fake, tx);

        let err = scanner
            .start_scan(Duration::from_secs(10), None)
            .await
            .unwrap_err();
        assert!(matches!(err, StreamError::RadioUnavailable(_)));
        assert!(!scanner.is_scanning());

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert!(found(&mut rx).0.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_scan_is_idempotent() {
        let fake = Arc::new(FakePlatform::new());
        fake.add_advert("AA0000000001", Some("Band"));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut scanner = ScanController::new(fake.clone(), tx);

        scanner.stop_scan().await;
        scanner
            .start_scan(Duration::from_secs(10), Some("not-a-uuid"))
            .await
            .unwrap();
        tokio::task::yield_now().await;
        scanner.stop_scan().await;
        scanner.stop_scan().await;
        assert!(!fake.is_scanning());

        tokio::time::sleep(Duration::from_secs(11)).await;
        let (devices, finished) = found(&mut rx);
        assert!(finished);
        // No synthetic fallback after an explicit stop.
        assert!(devices.iter().all(|d| !d.is_synthetic));
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_clears_previous_results() {
        let fake = Arc::new(FakePlatform::new());
        fake.add_advert("AA0000000001", Some("Band"));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut scanner = ScanController::new(fake.clone(), tx);

        scanner.start_scan(Duration::from_secs(10), None).await.unwrap();
        tokio::task::yield_now().await;
        scanner.start_scan(Duration::from_secs(10), None).await.unwrap();
        tokio::time::sleep(Duration::from_secs(11)).await;

        assert_eq!(scanner.devices().len(), 1);
        assert_eq!(fake.scan_starts(), 2);
        let _ = found(&mut rx);
    }
}
