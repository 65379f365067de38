//! Bluetooth Service Module
//!
//! Single-task coordinator for scanning, the connection lifecycle and the
//! active sample source. Commands from the shell, platform callbacks and
//! timer expiries all arrive as messages on this task, so no lifecycle
//! state is ever shared across threads.

use crate::domain::error::StreamError;
use crate::domain::models::{AppEvent, BluetoothCommand, DiscoveredDevice, MessageSeverity, StatusMessage};
use crate::domain::settings::EngineConfig;
use crate::infrastructure::bluetooth::connection::{
    AttemptId, ConnectionManager, Link, LinkEffect, LinkEvent,
};
use crate::infrastructure::bluetooth::platform::{
    BlePlatform, ConnectOptions, ConnectionHandle, PlatformError,
};
use crate::infrastructure::bluetooth::scanner::ScanController;
use crate::infrastructure::bluetooth::session::{SampleSink, SampleSource};
use crate::infrastructure::bluetooth::simulated::SineWaveSource;
use crate::infrastructure::bluetooth::trial::{GattSource, TrialConfig};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Messages the service sends itself from spawned work.
#[derive(Debug)]
enum Internal {
    Link(LinkEvent),
    ResumeDue,
    StreamEnded {
        generation: u64,
        result: Result<(), StreamError>,
    },
}

/// Main Bluetooth service coordinating all BLE operations
pub struct BluetoothService {
    platform: Arc<dyn BlePlatform>,
    config: EngineConfig,
    manager: ConnectionManager,
    scanner: ScanController,
    sink: Arc<dyn SampleSink>,
    event_sender: mpsc::UnboundedSender<AppEvent>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    internal_rx: mpsc::UnboundedReceiver<Internal>,
    retry_timer: Option<JoinHandle<()>>,
    resume_timer: Option<JoinHandle<()>>,
    stream_task: Option<JoinHandle<()>>,
    stream_generation: u64,
}

impl BluetoothService {
    pub fn new(
        platform: Arc<dyn BlePlatform>,
        config: EngineConfig,
        sink: Arc<dyn SampleSink>,
        event_sender: mpsc::UnboundedSender<AppEvent>,
    ) -> Self {
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        Self {
            scanner: ScanController::new(platform.clone(), event_sender.clone()),
            manager: ConnectionManager::new(config.reconnect_backoff.clone(), config.resume_settle),
            platform,
            config,
            sink,
            event_sender,
            internal_tx,
            internal_rx,
            retry_timer: None,
            resume_timer: None,
            stream_task: None,
            stream_generation: 0,
        }
    }

    /// Process commands until the shell drops its sender.
    pub async fn run(mut self, mut commands: mpsc::UnboundedReceiver<BluetoothCommand>) {
        info!("Bluetooth service started");
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                Some(internal) = self.internal_rx.recv() => self.handle_internal(internal),
            }
        }
        self.shutdown().await;
        info!("Bluetooth service stopped");
    }

    async fn handle_command(&mut self, command: BluetoothCommand) {
        debug!("Command: {:?}", command);
        match command {
            BluetoothCommand::StartScan => {
                let filter = self.config.scan_service_filter.clone();
                if let Err(e) = self
                    .scanner
                    .start_scan(self.config.scan_window, filter.as_deref())
                    .await
                {
                    self.report(e);
                    let _ = self.event_sender.send(AppEvent::ScanFinished);
                }
            }
            BluetoothCommand::StopScan => self.scanner.stop_scan().await,
            BluetoothCommand::Connect(device) => {
                self.scanner.stop_scan().await;
                self.dispatch(LinkEvent::ConnectRequested(device));
            }
            BluetoothCommand::Disconnect => self.dispatch(LinkEvent::DisconnectRequested),
            BluetoothCommand::StartStreaming => self.start_streaming(),
            BluetoothCommand::StopStreaming => {
                self.stop_streaming();
                self.dispatch(LinkEvent::StreamingChanged(false));
            }
        }
    }

    fn handle_internal(&mut self, internal: Internal) {
        match internal {
            Internal::Link(event) => self.dispatch(event),
            Internal::ResumeDue => {
                self.resume_timer = None;
                if self.manager.is_connected() {
                    info!("Resuming stream after reconnect");
                    self.start_streaming();
                }
            }
            Internal::StreamEnded { generation, result } => {
                if generation != self.stream_generation {
                    return;
                }
                self.stream_task = None;
                let _ = self.event_sender.send(AppEvent::StreamingChanged(false));
                match result {
                    Ok(()) => info!("Stream ended"),
                    Err(e) => {
                        self.sink.on_error(e.clone());
                        self.report_log(&e);
                        self.dispatch(LinkEvent::StreamingChanged(false));
                    }
                }
            }
        }
    }

    fn dispatch(&mut self, event: LinkEvent) {
        for effect in self.manager.handle(event) {
            self.apply(effect);
        }
    }

    fn apply(&mut self, effect: LinkEffect) {
        match effect {
            LinkEffect::Status(status) => {
                let _ = self.event_sender.send(AppEvent::ConnectionStatus(status));
            }
            LinkEffect::BeginConnect { attempt, device } => self.begin_connect(attempt, device),
            LinkEffect::ScheduleRetry { attempt, delay } => {
                abort(&mut self.retry_timer);
                let tx = self.internal_tx.clone();
                self.retry_timer = Some(tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = tx.send(Internal::Link(LinkEvent::RetryDue { attempt }));
                }));
            }
            LinkEffect::CancelRetry => abort(&mut self.retry_timer),
            LinkEffect::StopStreaming => self.stop_streaming(),
            LinkEffect::Teardown(handle) => {
                let platform = self.platform.clone();
                let tx = self.internal_tx.clone();
                tokio::spawn(async move {
                    if let Err(e) = platform.cancel_connection(&handle).await {
                        warn!("Teardown of {} failed: {}", handle.id(), e);
                    }
                    let _ = tx.send(Internal::Link(LinkEvent::TeardownFinished));
                });
            }
            LinkEffect::ResumeStreaming { after } => {
                abort(&mut self.resume_timer);
                let tx = self.internal_tx.clone();
                self.resume_timer = Some(tokio::spawn(async move {
                    tokio::time::sleep(after).await;
                    let _ = tx.send(Internal::ResumeDue);
                }));
            }
            LinkEffect::ClearSession => {
                let _ = self.event_sender.send(AppEvent::SessionCleared);
            }
            LinkEffect::Report(e) => self.report(e),
        }
    }

    fn begin_connect(&mut self, attempt: AttemptId, device: DiscoveredDevice) {
        let platform = self.platform.clone();
        let tx = self.internal_tx.clone();
        let settle = self.config.connect_settle;
        let mtu = self.config.preferred_mtu;

        tokio::spawn(async move {
            let event =
                match establish_link(platform.as_ref(), &device.identifier, settle, mtu, &tx).await {
                    Ok(handle) => LinkEvent::ConnectSucceeded { attempt, handle },
                    Err(e) => LinkEvent::ConnectFailed {
                        attempt,
                        error: connect_error(e),
                    },
                };
            let _ = tx.send(Internal::Link(event));
        });
    }

    fn start_streaming(&mut self) {
        let Some(link) = self.manager.link().cloned() else {
            self.report(StreamError::NotConnected);
            return;
        };
        self.stop_streaming();

        let mut source: Box<dyn SampleSource> = match link {
            Link::Real(handle) => Box::new(GattSource::new(
                self.platform.clone(),
                handle,
                TrialConfig::from(&self.config),
            )),
            Link::Simulated => Box::new(SineWaveSource::new(self.config.simulated_rate_hz)),
        };
        info!("Starting {}", source.describe());
        self.sink.on_stream_started();

        self.stream_generation += 1;
        let generation = self.stream_generation;
        let sink = self.sink.clone();
        let tx = self.internal_tx.clone();
        self.stream_task = Some(tokio::spawn(async move {
            let result = source.stream(sink).await;
            let _ = tx.send(Internal::StreamEnded { generation, result });
        }));

        let _ = self.event_sender.send(AppEvent::StreamingChanged(true));
        self.dispatch(LinkEvent::StreamingChanged(true));
    }

    /// Cancel the running source. Dropping its task releases any live
    /// subscription.
    fn stop_streaming(&mut self) {
        abort(&mut self.resume_timer);
        if let Some(task) = self.stream_task.take() {
            task.abort();
            self.stream_generation += 1;
            info!("Streaming stopped");
            let _ = self.event_sender.send(AppEvent::StreamingChanged(false));
        }
    }

    fn report(&self, e: StreamError) {
        self.report_log(&e);
        let _ = self.event_sender.send(AppEvent::Error(e));
    }

    fn report_log(&self, e: &StreamError) {
        if e.is_user_visible() {
            error!("{}", e);
        } else {
            warn!("{}", e);
        }
        let _ = self.event_sender.send(AppEvent::LogMessage(StatusMessage::new(
            e.to_string(),
            e.severity(),
        )));
    }

    async fn shutdown(&mut self) {
        self.scanner.stop_scan().await;
        self.stop_streaming();
        abort(&mut self.retry_timer);
        if let Some(handle) = self.manager.link().and_then(Link::handle).cloned() {
            if let Err(e) = self.platform.cancel_connection(&handle).await {
                debug!("cancel_connection on shutdown: {}", e);
            }
        }
        let _ = self.event_sender.send(AppEvent::LogMessage(StatusMessage::new(
            "Bluetooth stopped",
            MessageSeverity::Info,
        )));
    }
}

fn abort(task: &mut Option<JoinHandle<()>>) {
    if let Some(task) = task.take() {
        task.abort();
    }
}

fn connect_error(e: PlatformError) -> StreamError {
    match StreamError::from(e) {
        StreamError::Platform(msg) => StreamError::ConnectionFailed(msg),
        StreamError::NotConnected => StreamError::ConnectionFailed("link closed".to_string()),
        other => other,
    }
}

/// Connect, watch for drops, let the link settle, then negotiate and prime
/// the GATT cache. The drop watcher is armed before any setup step so a loss
/// at any point reaches the lifecycle as `LinkLost`.
async fn establish_link(
    platform: &dyn BlePlatform,
    device_id: &str,
    settle: Duration,
    mtu: u16,
    internal: &mpsc::UnboundedSender<Internal>,
) -> Result<ConnectionHandle, PlatformError> {
    let handle = platform.connect(device_id, &ConnectOptions::default()).await?;

    let id = handle.id();
    let lost = internal.clone();
    let watch = platform.on_unexpected_disconnect(
        &handle,
        Box::new(move || {
            let _ = lost.send(Internal::Link(LinkEvent::LinkLost { handle: id }));
        }),
    );
    if let Err(e) = watch {
        let _ = platform.cancel_connection(&handle).await;
        return Err(e);
    }

    tokio::time::sleep(settle).await;

    match platform.request_mtu(&handle, mtu).await {
        Ok(negotiated) => debug!("MTU negotiated: {}", negotiated),
        Err(e) => debug!("MTU request not honoured: {}", e),
    }
    if let Err(e) = platform.request_high_priority(&handle).await {
        debug!("High priority request not honoured: {}", e);
    }

    match platform.discover_services_and_characteristics(&handle).await {
        Ok(characteristics) => {
            info!("{} characteristics on {}", characteristics.len(), device_id);
            Ok(handle)
        }
        Err(e) => {
            let _ = platform.cancel_connection(&handle).await;
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{AccelSample, CharProperties, ConnectionStatus};
    use crate::domain::recording::Recorder;
    use crate::domain::scorer::ble_uuid;
    use crate::infrastructure::bluetooth::fake::FakePlatform;
    use crate::infrastructure::bluetooth::platform::HandleId;
    use crate::infrastructure::bluetooth::session::SessionSink;
    use std::sync::Mutex;

    const DEVICE: &str = "C0FFEE000001";

    struct Harness {
        fake: Arc<FakePlatform>,
        commands: mpsc::UnboundedSender<BluetoothCommand>,
        events: mpsc::UnboundedReceiver<AppEvent>,
        recorder: Arc<Mutex<Recorder>>,
    }

    impl Harness {
        fn start(fake: Arc<FakePlatform>) -> Self {
            let (event_tx, events) = mpsc::unbounded_channel();
            let (commands, command_rx) = mpsc::unbounded_channel();
            let recorder = Arc::new(Mutex::new(Recorder::new()));
            let sink = Arc::new(SessionSink::new(
                event_tx.clone(),
                recorder.clone(),
                Duration::ZERO,
            ));
            let service = BluetoothService::new(fake.clone(), EngineConfig::default(), sink, event_tx);
            tokio::spawn(service.run(command_rx));
            Self {
                fake,
                commands,
                events,
                recorder,
            }
        }

        fn send(&self, command: BluetoothCommand) {
            self.commands.send(command).unwrap();
        }

        /// Wait for the first event matching `pred`, discarding the rest.
        async fn expect<F>(&mut self, what: &str, mut pred: F) -> AppEvent
        where
            F: FnMut(&AppEvent) -> bool,
        {
            let wait = async {
                loop {
                    match self.events.recv().await {
                        Some(event) if pred(&event) => return event,
                        Some(_) => continue,
                        None => panic!("event channel closed"),
                    }
                }
            };
            tokio::time::timeout(Duration::from_secs(120), wait)
                .await
                .unwrap_or_else(|_| panic!("timed out waiting for {}", what))
        }

        fn drain(&mut self) -> Vec<AppEvent> {
            let mut events = Vec::new();
            while let Ok(event) = self.events.try_recv() {
                events.push(event);
            }
            events
        }
    }

    fn device() -> DiscoveredDevice {
        DiscoveredDevice::new(DEVICE, Some("Sensor".to_string()))
    }

    fn streaming_device(fake: &FakePlatform) {
        let data = ble_uuid(0xFFE1);
        fake.add_characteristic(
            DEVICE,
            ble_uuid(0xFFE0),
            data,
            CharProperties {
                notify: true,
                ..Default::default()
            },
        );
        fake.stream_on_subscribe(data, vec![0x00, 0x40, 0x00, 0x00, 0x00, 0x00]);
    }

    fn is_status(event: &AppEvent, status: ConnectionStatus) -> bool {
        matches!(event, AppEvent::ConnectionStatus(s) if *s == status)
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_then_stream_from_simulated_device() {
        let mut h = Harness::start(Arc::new(FakePlatform::new()));
        h.send(BluetoothCommand::StartScan);

        let found = h
            .expect("synthetic device", |e| matches!(e, AppEvent::DeviceFound(_)))
            .await;
        let AppEvent::DeviceFound(device) = found else {
            unreachable!()
        };
        assert!(device.is_synthetic);

        h.send(BluetoothCommand::Connect(device));
        h.expect("connected", |e| is_status(e, ConnectionStatus::Connected))
            .await;
        assert!(h.fake.connects() == 0);

        h.send(BluetoothCommand::StartStreaming);
        h.expect("sample", |e| matches!(e, AppEvent::Sample(s) if !s.is_zero()))
            .await;

        h.send(BluetoothCommand::Disconnect);
        h.expect("disconnected", |e| is_status(e, ConnectionStatus::Disconnected))
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_streams_from_real_device() {
        let fake = Arc::new(FakePlatform::new());
        streaming_device(&fake);
        let mut h = Harness::start(fake);
        h.recorder
            .lock()
            .unwrap()
            .start(tokio::time::Instant::now().into_std());

        h.send(BluetoothCommand::Connect(device()));
        h.expect("connected", |e| is_status(e, ConnectionStatus::Connected))
            .await;
        h.send(BluetoothCommand::StartStreaming);
        let sample = h
            .expect("sample", |e| matches!(e, AppEvent::Sample(_)))
            .await;
        assert!(matches!(sample, AppEvent::Sample(s) if s == AccelSample::new(1.0, 0.0, 0.0)));
        assert_eq!(h.recorder.lock().unwrap().len(), 1);
        assert_eq!(h.fake.live_subscriptions(), 1);

        h.send(BluetoothCommand::StopStreaming);
        h.expect("stopped", |e| matches!(e, AppEvent::StreamingChanged(false)))
            .await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(h.fake.live_subscriptions(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_streaming_requires_connection() {
        let mut h = Harness::start(Arc::new(FakePlatform::new()));
        h.send(BluetoothCommand::StartStreaming);
        let err = h
            .expect("error", |e| matches!(e, AppEvent::Error(_)))
            .await;
        assert!(matches!(err, AppEvent::Error(StreamError::NotConnected)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_discovery_exhaustion_is_reported() {
        let fake = Arc::new(FakePlatform::new());
        fake.add_characteristic(
            DEVICE,
            ble_uuid(0x1000),
            ble_uuid(0x1001),
            CharProperties {
                notify: true,
                ..Default::default()
            },
        );
        let mut h = Harness::start(fake);
        h.send(BluetoothCommand::Connect(device()));
        h.expect("connected", |e| is_status(e, ConnectionStatus::Connected))
            .await;
        h.send(BluetoothCommand::StartStreaming);
        h.expect("exhausted", |e| {
            matches!(e, AppEvent::Error(StreamError::DiscoveryExhausted))
        })
        .await;
        assert_eq!(h.fake.live_subscriptions(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_resumes_streaming() {
        let fake = Arc::new(FakePlatform::new());
        streaming_device(&fake);
        let mut h = Harness::start(fake);

        h.send(BluetoothCommand::Connect(device()));
        h.expect("connected", |e| is_status(e, ConnectionStatus::Connected))
            .await;
        h.send(BluetoothCommand::StartStreaming);
        h.expect("sample", |e| matches!(e, AppEvent::Sample(_))).await;

        h.fake.drop_link(HandleId(1));
        h.expect("reconnecting", |e| {
            is_status(e, ConnectionStatus::Reconnecting { attempt: 1 })
        })
        .await;
        h.expect("reconnected", |e| is_status(e, ConnectionStatus::Connected))
            .await;
        h.expect("resumed sample", |e| matches!(e, AppEvent::Sample(_)))
            .await;

        assert_eq!(h.fake.connects(), 2);
        assert_eq!(h.fake.live_subscriptions(), 1);
        assert_eq!(h.fake.max_live_subscriptions(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_exhaustion_reports_once() {
        let fake = Arc::new(FakePlatform::new());
        streaming_device(&fake);
        let mut h = Harness::start(fake);

        h.send(BluetoothCommand::Connect(device()));
        h.expect("connected", |e| is_status(e, ConnectionStatus::Connected))
            .await;

        h.fake
            .fail_every_connect(Some(PlatformError::DeviceNotFound(DEVICE.to_string())));
        h.fake.drop_link(HandleId(1));
        h.expect("exhausted", |e| {
            matches!(e, AppEvent::Error(StreamError::ReconnectExhausted { attempts: 5 }))
        })
        .await;

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(h.fake.connects(), 6);
        let later = h.drain();
        assert!(!later.iter().any(|e| matches!(e, AppEvent::Error(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_during_backoff_halts_attempts() {
        let fake = Arc::new(FakePlatform::new());
        streaming_device(&fake);
        let mut h = Harness::start(fake);

        h.send(BluetoothCommand::Connect(device()));
        h.expect("connected", |e| is_status(e, ConnectionStatus::Connected))
            .await;

        h.fake
            .fail_every_connect(Some(PlatformError::DeviceNotFound(DEVICE.to_string())));
        h.fake.drop_link(HandleId(1));
        h.expect("second attempt scheduled", |e| {
            is_status(e, ConnectionStatus::Reconnecting { attempt: 2 })
        })
        .await;
        let attempts = h.fake.connects();

        h.send(BluetoothCommand::Disconnect);
        h.expect("disconnected", |e| is_status(e, ConnectionStatus::Disconnected))
            .await;

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(h.fake.connects(), attempts);
        assert!(!h
            .drain()
            .iter()
            .any(|e| matches!(e, AppEvent::Error(StreamError::ReconnectExhausted { .. }))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_initial_connect_failure_is_reported() {
        let fake = Arc::new(FakePlatform::new());
        fake.fail_next_connect(PlatformError::Timeout);
        let mut h = Harness::start(fake);

        h.send(BluetoothCommand::Connect(device()));
        let err = h
            .expect("failure", |e| matches!(e, AppEvent::Error(_)))
            .await;
        assert!(matches!(err, AppEvent::Error(StreamError::ConnectionFailed(_))));

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(h.fake.connects(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_during_setup_is_not_reported_connected() {
        let fake = Arc::new(FakePlatform::new());
        streaming_device(&fake);
        let mut h = Harness::start(fake);

        h.send(BluetoothCommand::Connect(device()));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(h.fake.connects(), 1);
        h.fake.report_link_lost(HandleId(1));

        let err = h
            .expect("failure", |e| {
                assert!(
                    !is_status(e, ConnectionStatus::Connected),
                    "connected on a dropped link"
                );
                matches!(e, AppEvent::Error(_))
            })
            .await;
        assert!(matches!(err, AppEvent::Error(StreamError::ConnectionFailed(_))));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(h.fake.cancelled().contains(&HandleId(1)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_user_disconnect_tears_down_link() {
        let fake = Arc::new(FakePlatform::new());
        streaming_device(&fake);
        let mut h = Harness::start(fake);

        h.send(BluetoothCommand::Connect(device()));
        h.expect("connected", |e| is_status(e, ConnectionStatus::Connected))
            .await;
        h.send(BluetoothCommand::StartStreaming);
        h.expect("sample", |e| matches!(e, AppEvent::Sample(_))).await;

        h.send(BluetoothCommand::Disconnect);
        h.expect("cleared", |e| matches!(e, AppEvent::SessionCleared))
            .await;
        h.expect("disconnected", |e| is_status(e, ConnectionStatus::Disconnected))
            .await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(h.fake.cancelled(), vec![HandleId(1)]);
        assert!(h.fake.live_links().is_empty());
        assert_eq!(h.fake.live_subscriptions(), 0);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(h.fake.connects(), 1);
    }
}
