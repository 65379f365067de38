use crate::domain::models::AccelSample;
use eframe::egui;
use std::collections::VecDeque;

pub struct Components;

impl Components {
    pub fn heading(ui: &mut egui::Ui, text: &str) {
        ui.label(egui::RichText::new(text).heading().strong());
    }

    pub fn sub_heading(ui: &mut egui::Ui, text: &str) {
        ui.label(egui::RichText::new(text).strong().size(16.0));
    }

    pub fn brutalist_card<R>(
        ui: &mut egui::Ui,
        title: &str,
        add_contents: impl FnOnce(&mut egui::Ui) -> R,
    ) -> R {
        let stroke = ui.style().visuals.widgets.noninteractive.bg_stroke;
        let bg = ui.style().visuals.widgets.noninteractive.bg_fill;

        egui::Frame::none()
            .inner_margin(egui::Margin::same(15.0))
            .stroke(stroke)
            .fill(bg)
            .show(ui, |ui| {
                ui.set_min_width(ui.available_width());
                ui.vertical(|ui| {
                    ui.label(egui::RichText::new(title).strong().size(18.0));
                    ui.add_space(8.0);
                    add_contents(ui)
                })
                .inner
            })
            .inner
    }

    pub fn status_banner(
        ui: &mut egui::Ui,
        text: &str,
        bg_color: egui::Color32,
        text_color: egui::Color32,
    ) {
        ui.add_sized(
            [ui.available_width(), 35.0],
            egui::Label::new(
                egui::RichText::new(text)
                    .color(text_color)
                    .background_color(bg_color)
                    .size(16.0)
                    .strong(),
            )
            .wrap_mode(egui::TextWrapMode::Extend),
        );
    }

    /// Signed bar for one axis, full scale at `range` g.
    pub fn axis_bar(ui: &mut egui::Ui, label: &str, value: f32, range: f32, color: egui::Color32) {
        ui.horizontal(|ui| {
            ui.label(egui::RichText::new(label).monospace().strong());
            let width = (ui.available_width() - 80.0).max(60.0);
            let (rect, _) = ui.allocate_exact_size(egui::vec2(width, 18.0), egui::Sense::hover());
            let painter = ui.painter_at(rect);
            let stroke = ui.style().visuals.widgets.noninteractive.bg_stroke;

            painter.rect_stroke(rect, 0.0, stroke);
            let fraction = (value / range).clamp(-1.0, 1.0);
            let center = rect.center().x;
            let end = center + fraction * rect.width() / 2.0;
            let bar = egui::Rect::from_x_y_ranges(
                center.min(end)..=center.max(end),
                rect.y_range(),
            );
            painter.rect_filled(bar, 0.0, color);
            painter.vline(center, rect.y_range(), stroke);

            ui.label(egui::RichText::new(format!("{:+.3}", value)).monospace());
        });
    }

    /// Three overlaid traces of recent samples.
    pub fn sample_plot(
        ui: &mut egui::Ui,
        history: &VecDeque<AccelSample>,
        range: f32,
        colors: [egui::Color32; 3],
    ) {
        let size = egui::vec2(ui.available_width(), 160.0);
        let (rect, _) = ui.allocate_exact_size(size, egui::Sense::hover());
        let painter = ui.painter_at(rect);
        let stroke = ui.style().visuals.widgets.noninteractive.bg_stroke;
        painter.rect_stroke(rect, 0.0, stroke);
        painter.hline(rect.x_range(), rect.center().y, egui::Stroke::new(1.0, stroke.color));

        if history.len() < 2 {
            return;
        }
        let step = rect.width() / (history.len() - 1) as f32;
        let to_y = |v: f32| rect.center().y - (v / range).clamp(-1.0, 1.0) * rect.height() / 2.0;

        let axes: [fn(&AccelSample) -> f32; 3] = [|s| s.x, |s| s.y, |s| s.z];
        for (axis, color) in axes.iter().zip(colors) {
            let points: Vec<egui::Pos2> = history
                .iter()
                .enumerate()
                .map(|(i, s)| egui::pos2(rect.left() + i as f32 * step, to_y(axis(s))))
                .collect();
            painter.add(egui::Shape::line(points, egui::Stroke::new(2.0, color)));
        }
    }
}
