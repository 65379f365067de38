use crate::domain::models::{BluetoothCommand, ConnectionStatus, DiscoveredDevice};
use crate::presentation::app::AccelStreamApp;
use crate::presentation::components::Components;
use crate::presentation::theme::BrutalistPalette;
use eframe::egui;
use egui_extras::{Column, TableBuilder};

/// Full scale of the live bars and plot, in g.
const DISPLAY_RANGE: f32 = 2.0;

pub fn render(app: &mut AccelStreamApp, ui: &mut egui::Ui) {
    Components::heading(ui, "Accel Stream");
    ui.add_space(20.0);

    ui_error_slot(app, ui);

    ui_connection_panel(app, ui);
    ui.add_space(15.0);

    ui_status_panel(app, ui);
    ui.add_space(15.0);

    ui_live_panel(app, ui);
    ui.add_space(15.0);

    ui_recording_panel(app, ui);
}

fn ui_error_slot(app: &mut AccelStreamApp, ui: &mut egui::Ui) {
    let Some(err) = app.view.error_slot.current().cloned() else {
        return;
    };
    let palette = BrutalistPalette::new(app.is_dark_mode);

    Components::brutalist_card(ui, "Problem", |ui| {
        ui.label(
            egui::RichText::new(err.to_string())
                .color(palette.severity(err.severity()))
                .strong(),
        );
        if ui.button("Dismiss").clicked() {
            app.view.error_slot.dismiss();
        }
    });
    ui.add_space(15.0);
}

fn ui_connection_panel(app: &mut AccelStreamApp, ui: &mut egui::Ui) {
    Components::brutalist_card(ui, "Connection Control", |ui| {
        let palette = BrutalistPalette::new(app.is_dark_mode);
        let (status_text, bg_color, text_color) = palette.status(app.view.connection_status);
        Components::status_banner(ui, &status_text, bg_color, text_color);

        if let Some(device) = &app.selected_device {
            if app.view.connection_status != ConnectionStatus::Disconnected {
                ui.label(format!("Device: {} ({})", device.label(), device.identifier));
            }
        }

        ui.add_space(10.0);

        ui.horizontal(|ui| {
            match app.view.connection_status {
                ConnectionStatus::Disconnected => {}
                ConnectionStatus::Disconnecting => {
                    ui.add_enabled(false, egui::Button::new("Disconnecting..."));
                }
                _ => {
                    if ui.button("Disconnect").clicked() {
                        app.send(BluetoothCommand::Disconnect);
                    }
                }
            }

            if app.view.is_scanning {
                if ui.button("Stop Scan").clicked() {
                    app.send(BluetoothCommand::StopScan);
                }
                ui.spinner();
            } else if ui.button("Scan for Devices").clicked() {
                app.start_scan();
            }

            if app.view.connection_status == ConnectionStatus::Disconnected
                && ui.button("Use Simulated Device").clicked()
            {
                app.connect(DiscoveredDevice::synthetic());
            }
        });

        if !app.view.devices.is_empty() {
            ui.separator();
            ui.label("Nearby Devices:");
            ui_device_table(app, ui);
        }
    });
}

fn ui_device_table(app: &mut AccelStreamApp, ui: &mut egui::Ui) {
    let can_connect = app.view.connection_status == ConnectionStatus::Disconnected;
    let known = app
        .settings
        .lock()
        .map(|s| s.get().known_device_ids.clone())
        .unwrap_or_default();
    let mut picked: Option<DiscoveredDevice> = None;

    ui.push_id("scan_results", |ui| {
        TableBuilder::new(ui)
            .striped(true)
            .max_scroll_height(160.0)
            .column(Column::remainder().at_least(160.0))
            .column(Column::auto().at_least(140.0))
            .column(Column::auto())
            .header(22.0, |mut header| {
                header.col(|ui| {
                    ui.strong("Name");
                });
                header.col(|ui| {
                    ui.strong("Identifier");
                });
                header.col(|_| {});
            })
            .body(|mut body| {
                for device in &app.view.devices {
                    body.row(26.0, |mut row| {
                        row.col(|ui| {
                            let mut label = device.label().to_string();
                            if device.is_synthetic {
                                label.push_str(" (simulated)");
                            } else if known.contains(&device.identifier) {
                                label.push_str(" ★");
                            }
                            ui.label(label);
                        });
                        row.col(|ui| {
                            ui.monospace(&device.identifier);
                        });
                        row.col(|ui| {
                            if ui
                                .add_enabled(can_connect, egui::Button::new("Connect"))
                                .clicked()
                            {
                                picked = Some(device.clone());
                            }
                        });
                    });
                }
            });
    });

    if let Some(device) = picked {
        app.connect(device);
    }
}

fn ui_status_panel(app: &mut AccelStreamApp, ui: &mut egui::Ui) {
    let Some(msg) = app.view.status_message.clone() else {
        return;
    };
    let palette = BrutalistPalette::new(app.is_dark_mode);

    Components::brutalist_card(ui, "System Status", |ui| {
        ui.label(
            egui::RichText::new(&msg.message)
                .color(palette.severity(msg.severity))
                .strong(),
        );
    });
}

fn ui_live_panel(app: &mut AccelStreamApp, ui: &mut egui::Ui) {
    Components::brutalist_card(ui, "Live Acceleration", |ui| {
        let connected = app.view.connection_status == ConnectionStatus::Connected;
        ui.horizontal(|ui| {
            if app.view.is_streaming {
                if ui.button("Stop Streaming").clicked() {
                    app.send(BluetoothCommand::StopStreaming);
                }
                ui.spinner();
            } else if ui
                .add_enabled(connected, egui::Button::new("Start Streaming"))
                .clicked()
            {
                app.send(BluetoothCommand::StartStreaming);
            }
        });

        ui.add_space(10.0);

        let Some(sample) = app.view.latest_sample else {
            ui.label("No samples yet.");
            return;
        };

        let palette = BrutalistPalette::new(app.is_dark_mode);
        let [x_color, y_color, z_color] = palette.axes();
        Components::axis_bar(ui, "X", sample.x, DISPLAY_RANGE, x_color);
        Components::axis_bar(ui, "Y", sample.y, DISPLAY_RANGE, y_color);
        Components::axis_bar(ui, "Z", sample.z, DISPLAY_RANGE, z_color);
        ui.label(format!("|a| = {:.3} g", sample.magnitude()));

        ui.add_space(10.0);
        Components::sample_plot(ui, &app.view.history, DISPLAY_RANGE, palette.axes());
    });
}

fn ui_recording_panel(app: &mut AccelStreamApp, ui: &mut egui::Ui) {
    let (is_recording, recorded) = app
        .recorder
        .lock()
        .map(|r| (r.is_recording(), r.len()))
        .unwrap_or((false, 0));

    Components::brutalist_card(ui, "Recording", |ui| {
        ui.horizontal(|ui| {
            let label = if is_recording {
                "Stop Recording"
            } else {
                "Start Recording"
            };
            if ui.button(label).clicked() {
                app.toggle_recording();
            }
            if ui
                .add_enabled(!is_recording && recorded > 0, egui::Button::new("Export CSV"))
                .clicked()
            {
                app.export_recording();
            }
        });

        ui.label(format!("{} samples recorded", recorded));
        if let Some(path) = &app.last_export {
            ui.label(
                egui::RichText::new(format!("Last export: {}", path.display()))
                    .small()
                    .weak(),
            );
        }
    });
}
