use crate::domain::error::ErrorSlot;
use crate::domain::models::{
    AccelSample, AppEvent, BluetoothCommand, ConnectionStatus, DiscoveredDevice, MessageSeverity,
    StatusMessage, Tab,
};
use crate::domain::recording::{self, Recorder};
use crate::domain::settings::SettingsService;
use crate::infrastructure::bluetooth::session::SessionSink;
use crate::infrastructure::bluetooth::{default_platform, BluetoothService};
use crate::presentation::tabs::settings::ListDrafts;
use eframe::egui;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

const HISTORY_LEN: usize = 300;
const EVENT_LOG_LEN: usize = 200;

/// What the shell knows about the engine, rebuilt purely from `AppEvent`s.
#[derive(Debug)]
pub struct SessionView {
    pub connection_status: ConnectionStatus,
    pub is_scanning: bool,
    pub is_streaming: bool,
    pub devices: Vec<DiscoveredDevice>,
    pub latest_sample: Option<AccelSample>,
    pub history: VecDeque<AccelSample>,
    pub error_slot: ErrorSlot,
    pub status_message: Option<StatusMessage>,
    pub event_log: VecDeque<StatusMessage>,
}

impl Default for SessionView {
    fn default() -> Self {
        Self {
            connection_status: ConnectionStatus::Disconnected,
            is_scanning: false,
            is_streaming: false,
            devices: Vec::new(),
            latest_sample: None,
            history: VecDeque::with_capacity(HISTORY_LEN),
            error_slot: ErrorSlot::new(),
            status_message: None,
            event_log: VecDeque::with_capacity(EVENT_LOG_LEN),
        }
    }
}

impl SessionView {
    pub fn begin_scan(&mut self) {
        self.devices.clear();
        self.is_scanning = true;
    }

    pub fn apply(&mut self, event: AppEvent) {
        match event {
            AppEvent::DeviceFound(device) => {
                if !self.devices.iter().any(|d| d.identifier == device.identifier) {
                    self.devices.push(device);
                }
            }
            AppEvent::ScanFinished => self.is_scanning = false,
            AppEvent::ConnectionStatus(status) => {
                self.connection_status = status;
                if status == ConnectionStatus::Disconnected {
                    self.is_streaming = false;
                }
            }
            AppEvent::StreamingChanged(streaming) => self.is_streaming = streaming,
            AppEvent::Sample(sample) => {
                if self.history.len() == HISTORY_LEN {
                    self.history.pop_front();
                }
                self.history.push_back(sample);
                self.latest_sample = Some(sample);
            }
            AppEvent::SessionCleared => {
                self.is_streaming = false;
                self.latest_sample = None;
                self.history.clear();
            }
            AppEvent::Error(err) => {
                let message = StatusMessage::new(err.to_string(), err.severity());
                if err.is_user_visible() {
                    self.error_slot.set(err);
                }
                self.log(message);
            }
            AppEvent::LogMessage(message) => {
                self.status_message = Some(message.clone());
                self.log(message);
            }
        }
    }

    fn log(&mut self, message: StatusMessage) {
        if self.event_log.len() == EVENT_LOG_LEN {
            self.event_log.pop_front();
        }
        self.event_log.push_back(message);
    }
}

pub struct AccelStreamApp {
    // Services
    pub(crate) settings: Arc<Mutex<SettingsService>>,
    pub(crate) recorder: Arc<Mutex<Recorder>>,

    // Bluetooth
    pub(crate) bluetooth_tx: mpsc::UnboundedSender<BluetoothCommand>,
    pub(crate) event_rx: mpsc::UnboundedReceiver<AppEvent>,

    // State
    pub(crate) view: SessionView,
    pub(crate) selected_device: Option<DiscoveredDevice>,
    pub(crate) last_export: Option<PathBuf>,

    // UI State
    pub(crate) list_drafts: ListDrafts,
    pub(crate) selected_tab: Tab,
    pub(crate) is_dark_mode: bool,

    // Logging guard
    pub(crate) _logging_guard: Option<crate::infrastructure::logging::LoggingGuard>,
}

impl AccelStreamApp {
    pub fn new(cc: &eframe::CreationContext<'_>) -> Self {
        crate::presentation::theme::configure_neubrutalism(&cc.egui_ctx, false);

        let settings_service = match SettingsService::new() {
            Ok(service) => service,
            Err(e) => {
                eprintln!("Settings directory unavailable ({}), using ./settings.json", e);
                SettingsService::at_path(PathBuf::from("settings.json"))
            }
        };

        let logging_guard =
            crate::infrastructure::logging::init_logger(&settings_service.get().log_settings)
                .map_err(|e| eprintln!("Failed to initialize logging: {}", e))
                .ok();

        info!("Starting Accel Stream");

        let config = settings_service.engine_config();
        let list_drafts = ListDrafts::from_settings(settings_service.get());
        let settings = Arc::new(Mutex::new(settings_service));
        let recorder = Arc::new(Mutex::new(Recorder::new()));
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (bt_cmd_tx, bt_cmd_rx) = mpsc::unbounded_channel();
        let sink = Arc::new(SessionSink::new(
            event_tx.clone(),
            recorder.clone(),
            config.display_throttle,
        ));

        std::thread::spawn(move || {
            let rt = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(rt) => rt,
                Err(e) => {
                    error!("Failed to create tokio runtime for Bluetooth: {}", e);
                    let _ = event_tx.send(AppEvent::LogMessage(StatusMessage::new(
                        format!("Bluetooth engine failed to start: {}", e),
                        MessageSeverity::Error,
                    )));
                    return;
                }
            };

            rt.block_on(async move {
                let service = BluetoothService::new(default_platform(), config, sink, event_tx);
                service.run(bt_cmd_rx).await;
            });
        });

        Self {
            settings,
            recorder,
            bluetooth_tx: bt_cmd_tx,
            event_rx,
            view: SessionView::default(),
            selected_device: None,
            last_export: None,
            list_drafts,
            selected_tab: Tab::Home,
            is_dark_mode: false,
            _logging_guard: logging_guard,
        }
    }

    pub(crate) fn send(&self, command: BluetoothCommand) {
        if self.bluetooth_tx.send(command).is_err() {
            warn!("Bluetooth engine is not running");
        }
    }

    pub(crate) fn start_scan(&mut self) {
        self.view.begin_scan();
        self.send(BluetoothCommand::StartScan);
    }

    pub(crate) fn connect(&mut self, device: DiscoveredDevice) {
        self.selected_device = Some(device.clone());
        self.send(BluetoothCommand::Connect(device));
    }

    pub(crate) fn toggle_recording(&mut self) {
        if let Ok(mut recorder) = self.recorder.lock() {
            if recorder.is_recording() {
                recorder.stop();
            } else {
                recorder.start(Instant::now());
            }
        }
    }

    pub(crate) fn export_recording(&mut self) {
        let dir = match self.settings.lock() {
            Ok(settings) => settings.export_dir(),
            Err(_) => return,
        };
        let result = match self.recorder.lock() {
            Ok(recorder) => recording::export_csv(recorder.samples(), &dir),
            Err(_) => return,
        };
        let message = match result {
            Ok(path) => {
                info!("Exported recording to {}", path.display());
                let msg = format!("Saved {}", path.display());
                self.last_export = Some(path);
                StatusMessage::new(msg, MessageSeverity::Success)
            }
            Err(e) => {
                error!("Export failed: {:#}", e);
                StatusMessage::new(format!("Export failed: {}", e), MessageSeverity::Error)
            }
        };
        self.view.apply(AppEvent::LogMessage(message));
    }

    fn handle_event(&mut self, event: AppEvent) {
        match &event {
            AppEvent::ConnectionStatus(ConnectionStatus::Connected) => {
                if let Some(device) = self.selected_device.as_ref().filter(|d| !d.is_synthetic) {
                    if let Ok(mut settings) = self.settings.lock() {
                        if let Err(e) = settings.remember_device(&device.identifier) {
                            warn!("Failed to remember device: {}", e);
                        }
                    }
                }
            }
            AppEvent::SessionCleared => {
                if let Ok(mut recorder) = self.recorder.lock() {
                    recorder.stop();
                }
            }
            _ => {}
        }
        self.view.apply(event);
    }
}

impl eframe::App for AccelStreamApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        while let Ok(event) = self.event_rx.try_recv() {
            self.handle_event(event);
        }

        ctx.request_repaint_after(Duration::from_millis(33));

        egui::TopBottomPanel::top("top_panel").show(ctx, |ui| {
            egui::menu::bar(ui, |ui| {
                ui.selectable_value(&mut self.selected_tab, Tab::Home, "Home");
                ui.selectable_value(&mut self.selected_tab, Tab::Settings, "Settings");
                ui.selectable_value(&mut self.selected_tab, Tab::Debug, "Debug");

                ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                    let switch_icon = if self.is_dark_mode {
                        "☀ Light"
                    } else {
                        "🌙 Dark"
                    };
                    if ui.button(switch_icon).clicked() {
                        self.is_dark_mode = !self.is_dark_mode;
                        crate::presentation::theme::configure_neubrutalism(ctx, self.is_dark_mode);
                    }
                });
            });
        });

        egui::CentralPanel::default().show(ctx, |ui| {
            egui::ScrollArea::vertical().show(ui, |ui| {
                ui.vertical_centered(|ui| {
                    ui.set_max_width(800.0);
                    ui.add_space(20.0);

                    use crate::presentation::tabs;
                    match self.selected_tab {
                        Tab::Home => tabs::home::render(self, ui),
                        Tab::Settings => tabs::settings::render(self, ui),
                        Tab::Debug => tabs::debug::render(self, ui),
                    }

                    ui.add_space(50.0);
                });
            });
        });
    }
}
