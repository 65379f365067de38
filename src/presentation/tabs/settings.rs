use crate::domain::models::{AppEvent, MessageSeverity, StatusMessage};
use crate::domain::settings::Settings;
use crate::presentation::app::AccelStreamApp;
use crate::presentation::components::Components;
use eframe::egui;

/// Text buffers for the list-valued settings while they are being edited.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListDrafts {
    pub backoff: String,
    pub opcodes: String,
}

impl ListDrafts {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            backoff: settings
                .reconnect_backoff_ms
                .iter()
                .map(|ms| ms.to_string())
                .collect::<Vec<_>>()
                .join(", "),
            opcodes: settings
                .arming_opcodes
                .iter()
                .map(|op| format!("{:02X}", op))
                .collect::<Vec<_>>()
                .join(" "),
        }
    }
}

/// Parse "500, 1000 2000" into milliseconds. Empty input is rejected.
pub fn parse_backoff(text: &str) -> Result<Vec<u64>, String> {
    let values = text
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|part| !part.is_empty())
        .map(|part| {
            part.parse::<u64>()
                .map_err(|_| format!("'{}' is not a delay in milliseconds", part))
        })
        .collect::<Result<Vec<_>, _>>()?;
    if values.is_empty() {
        return Err("at least one reconnect delay is required".to_string());
    }
    Ok(values)
}

/// Parse hex opcodes such as "01 02 0xFF 00".
pub fn parse_opcodes(text: &str) -> Result<Vec<u8>, String> {
    text.split(|c: char| c == ',' || c.is_whitespace())
        .filter(|part| !part.is_empty())
        .map(|part| {
            let digits = part
                .strip_prefix("0x")
                .or_else(|| part.strip_prefix("0X"))
                .unwrap_or(part);
            u8::from_str_radix(digits, 16).map_err(|_| format!("'{}' is not a hex byte", part))
        })
        .collect()
}

pub fn render(app: &mut AccelStreamApp, ui: &mut egui::Ui) {
    Components::heading(ui, "Global Settings");
    ui.add_space(20.0);

    let mut outcome: Option<StatusMessage> = None;

    if let Ok(mut settings) = app.settings.lock() {
        let settings_mut = settings.get_mut();

        Components::brutalist_card(ui, "Discovery", |ui| {
            egui::Grid::new("scan_grid")
                .spacing([10.0, 10.0])
                .show(ui, |ui| {
                    ui.label("Scan Window (ms):");
                    ui.add(
                        egui::DragValue::new(&mut settings_mut.scan_window_ms)
                            .range(1000..=60_000)
                            .speed(100),
                    );
                    ui.end_row();

                    ui.label("Service Filter:");
                    let mut filter = settings_mut.scan_service_filter.clone().unwrap_or_default();
                    if ui
                        .add(egui::TextEdit::singleline(&mut filter).hint_text("any service"))
                        .changed()
                    {
                        settings_mut.scan_service_filter =
                            Some(filter).filter(|f| !f.trim().is_empty());
                    }
                    ui.end_row();
                });
        });

        ui.add_space(10.0);

        Components::brutalist_card(ui, "Connection", |ui| {
            egui::Grid::new("link_grid")
                .spacing([10.0, 10.0])
                .show(ui, |ui| {
                    ui.label("Reconnect Delays (ms):");
                    ui.text_edit_singleline(&mut app.list_drafts.backoff);
                    ui.end_row();

                    ui.label("Connect Settle (ms):");
                    ui.add(
                        egui::DragValue::new(&mut settings_mut.connect_settle_ms).range(0..=5000),
                    );
                    ui.end_row();

                    ui.label("Resume Settle (ms):");
                    ui.add(
                        egui::DragValue::new(&mut settings_mut.resume_settle_ms).range(0..=5000),
                    );
                    ui.end_row();

                    ui.label("Preferred MTU:");
                    ui.add(egui::DragValue::new(&mut settings_mut.preferred_mtu).range(23..=517));
                    ui.end_row();
                });
        });

        ui.add_space(10.0);

        Components::brutalist_card(ui, "Characteristic Probing", |ui| {
            egui::Grid::new("trial_grid")
                .spacing([10.0, 10.0])
                .show(ui, |ui| {
                    ui.label("Trial Timeout (ms):");
                    ui.add(
                        egui::DragValue::new(&mut settings_mut.trial_timeout_ms)
                            .range(500..=30_000)
                            .speed(100),
                    );
                    ui.end_row();

                    ui.label("Start Opcodes (hex):");
                    ui.text_edit_singleline(&mut app.list_drafts.opcodes);
                    ui.end_row();

                    ui.label("Opcode Gap (ms):");
                    ui.add(egui::DragValue::new(&mut settings_mut.arming_gap_ms).range(0..=2000));
                    ui.end_row();
                });
        });

        ui.add_space(10.0);

        Components::brutalist_card(ui, "Session", |ui| {
            egui::Grid::new("session_grid")
                .spacing([10.0, 10.0])
                .show(ui, |ui| {
                    ui.label("Display Interval (ms):");
                    ui.add(
                        egui::DragValue::new(&mut settings_mut.display_throttle_ms).range(0..=1000),
                    );
                    ui.end_row();

                    ui.label("Simulated Rate (Hz):");
                    ui.add(egui::Slider::new(&mut settings_mut.simulated_rate_hz, 1..=200));
                    ui.end_row();

                    ui.label("Export Folder:");
                    ui.text_edit_singleline(&mut settings_mut.export_dir);
                    ui.end_row();
                });
        });

        ui.add_space(10.0);

        Components::brutalist_card(ui, "Logging & Debug", |ui| {
            ui.horizontal(|ui| {
                ui.label("Verbosity Level:");
                egui::ComboBox::from_id_salt("log_level")
                    .selected_text(&settings_mut.log_settings.level)
                    .show_ui(ui, |ui| {
                        for level in &["trace", "debug", "info", "warn", "error"] {
                            ui.selectable_value(
                                &mut settings_mut.log_settings.level,
                                level.to_string(),
                                *level,
                            );
                        }
                    });
            });

            ui.checkbox(
                &mut settings_mut.log_settings.console_logging_enabled,
                "Console Logs",
            );
            ui.checkbox(
                &mut settings_mut.log_settings.file_logging_enabled,
                "File Logs",
            );

            if settings_mut.log_settings.file_logging_enabled {
                ui.indent("file_logs", |ui| {
                    ui.horizontal(|ui| {
                        ui.label("Save Path:");
                        ui.text_edit_singleline(&mut settings_mut.log_settings.log_dir);
                    });
                    ui.horizontal(|ui| {
                        ui.label("Rotation:");
                        egui::ComboBox::from_id_salt("log_rot")
                            .selected_text(&settings_mut.log_settings.rotation)
                            .show_ui(ui, |ui| {
                                for rot in &["daily", "hourly", "minutely", "never"] {
                                    ui.selectable_value(
                                        &mut settings_mut.log_settings.rotation,
                                        rot.to_string(),
                                        *rot,
                                    );
                                }
                            });
                    });
                });
            }
        });

        ui.add_space(10.0);

        ui.label(
            egui::RichText::new("Engine and logging changes take effect after a restart.")
                .italics()
                .size(12.0),
        );

        ui.horizontal(|ui| {
            if ui.button("Save Settings").clicked() {
                let parsed = parse_backoff(&app.list_drafts.backoff)
                    .and_then(|backoff| Ok((backoff, parse_opcodes(&app.list_drafts.opcodes)?)));
                outcome = Some(match parsed {
                    Ok((backoff, opcodes)) => {
                        let settings_mut = settings.get_mut();
                        settings_mut.reconnect_backoff_ms = backoff;
                        settings_mut.arming_opcodes = opcodes;
                        match settings.save() {
                            Ok(()) => StatusMessage::new("Settings saved", MessageSeverity::Success),
                            Err(e) => StatusMessage::new(
                                format!("Failed to save settings: {}", e),
                                MessageSeverity::Error,
                            ),
                        }
                    }
                    Err(reason) => StatusMessage::new(
                        format!("Settings not saved: {}", reason),
                        MessageSeverity::Warning,
                    ),
                });
                app.list_drafts = ListDrafts::from_settings(settings.get());
            }
            if ui.button("Restore Defaults").clicked() {
                let log_settings = settings.get().log_settings.clone();
                *settings.get_mut() = Settings {
                    log_settings,
                    ..Settings::default()
                };
                app.list_drafts = ListDrafts::from_settings(settings.get());
            }
        });
    }

    if let Some(message) = outcome {
        app.view.apply(AppEvent::LogMessage(message));
    }
}
