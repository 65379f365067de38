use crate::domain::models::ConnectionStatus;
use crate::presentation::app::AccelStreamApp;
use crate::presentation::components::Components;
use crate::presentation::theme::BrutalistPalette;
use eframe::egui;

pub fn render(app: &mut AccelStreamApp, ui: &mut egui::Ui) {
    Components::heading(ui, "Debug & Internal State");
    ui.add_space(20.0);

    Components::brutalist_card(ui, "Bluetooth Engine Status", |ui| {
        ui.horizontal(|ui| {
            ui.label("State:");
            let (text, color) = match (app.view.connection_status, app.view.is_streaming) {
                (ConnectionStatus::Connected, true) => {
                    ("STREAMING", egui::Color32::from_rgb(0, 255, 100))
                }
                (ConnectionStatus::Connected, false) => {
                    ("CONNECTED", egui::Color32::from_rgb(0, 200, 255))
                }
                (ConnectionStatus::Disconnected, _) => ("IDLE", egui::Color32::from_gray(150)),
                _ => ("TRANSITIONING", egui::Color32::from_rgb(255, 200, 0)),
            };
            ui.label(egui::RichText::new(text).color(color).strong());
        });

        if let ConnectionStatus::Reconnecting { attempt } = app.view.connection_status {
            ui.label(format!("Reconnect attempt: {}", attempt));
        }

        if let Some(device) = &app.selected_device {
            ui.label(format!("Endpoint: {}", device.identifier));
            if device.is_synthetic {
                ui.label("Source: simulated sine wave");
            }
        }
    });

    ui.add_space(10.0);

    let (total, recorded) = app
        .recorder
        .lock()
        .map(|r| (r.total_received(), r.len()))
        .unwrap_or_default();

    Components::brutalist_card(ui, "Sample Counters", |ui| {
        egui::Grid::new("debug_grid")
            .spacing([20.0, 5.0])
            .show(ui, |ui| {
                ui.label("Accepted:");
                ui.label(total.to_string());
                ui.end_row();
                ui.label("Recorded:");
                ui.label(recorded.to_string());
                ui.end_row();
                ui.label("Displayed:");
                ui.label(app.view.history.len().to_string());
                ui.end_row();
                if let Some(sample) = app.view.latest_sample {
                    ui.label("Latest:");
                    ui.label(format!("{:.4}, {:.4}, {:.4}", sample.x, sample.y, sample.z));
                    ui.end_row();
                }
            });

        ui.add_space(5.0);
        if ui.button("Discard Recording").clicked() {
            if let Ok(mut recorder) = app.recorder.lock() {
                recorder.clear();
            }
        }
    });

    ui.add_space(10.0);

    Components::brutalist_card(ui, "Payload Logging", |ui| {
        if let Ok(mut settings) = app.settings.lock() {
            ui.checkbox(
                &mut settings.get_mut().debug_raw_data_logging,
                "Log raw notification payloads (hex)",
            );
        }
        ui.label(
            egui::RichText::new("Save settings and restart to apply.")
                .italics()
                .size(12.0),
        );
    });

    ui.add_space(10.0);

    let palette = BrutalistPalette::new(app.is_dark_mode);
    Components::brutalist_card(ui, "Event Log", |ui| {
        if app.view.event_log.is_empty() {
            ui.label("Nothing yet.");
            return;
        }
        egui::ScrollArea::vertical()
            .id_salt("event_log")
            .max_height(220.0)
            .stick_to_bottom(true)
            .show(ui, |ui| {
                for entry in &app.view.event_log {
                    ui.label(
                        egui::RichText::new(&entry.message)
                            .monospace()
                            .color(palette.severity(entry.severity)),
                    );
                }
            });
    });
}
