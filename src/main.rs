#![cfg_attr(not(debug_assertions), windows_subsystem = "windows")]

use accel_stream::presentation::app::AccelStreamApp;
use eframe::egui;

fn main() -> Result<(), eframe::Error> {
    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([900.0, 760.0])
            .with_min_inner_size([520.0, 480.0])
            .with_title("Accel Stream"),
        ..Default::default()
    };

    eframe::run_native(
        "Accel Stream",
        options,
        Box::new(|cc| Ok(Box::new(AccelStreamApp::new(cc)))),
    )
}
