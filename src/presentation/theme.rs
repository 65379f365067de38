use crate::domain::models::{ConnectionStatus, MessageSeverity};
use eframe::egui;

/// Flat high-contrast colors, named by what they signal.
pub struct BrutalistPalette {
    pub bg: egui::Color32,
    pub fg: egui::Color32,
    pub stroke: egui::Color32,
    pub busy: egui::Color32,
    pub live: egui::Color32,
    pub selection: egui::Color32,
    pub danger: egui::Color32,
    pub info: egui::Color32,
}

impl BrutalistPalette {
    pub fn new(is_dark: bool) -> Self {
        if is_dark {
            Self {
                bg: egui::Color32::from_gray(22),
                fg: egui::Color32::from_gray(240),
                stroke: egui::Color32::from_gray(240),
                busy: egui::Color32::from_rgb(250, 190, 20),
                live: egui::Color32::from_rgb(40, 230, 140),
                selection: egui::Color32::from_rgb(60, 220, 240),
                danger: egui::Color32::from_rgb(250, 90, 90),
                info: egui::Color32::from_rgb(110, 130, 255),
            }
        } else {
            Self {
                bg: egui::Color32::from_gray(242),
                fg: egui::Color32::from_gray(10),
                stroke: egui::Color32::from_gray(10),
                busy: egui::Color32::from_rgb(255, 210, 30),
                live: egui::Color32::from_rgb(20, 190, 110),
                selection: egui::Color32::from_rgb(40, 190, 250),
                danger: egui::Color32::from_rgb(230, 50, 60),
                info: egui::Color32::from_rgb(60, 70, 230),
            }
        }
    }

    /// Trace colors for the x, y and z axes.
    pub fn axes(&self) -> [egui::Color32; 3] {
        [self.danger, self.live, self.info]
    }

    /// Banner text and colors for a connection state.
    pub fn status(&self, status: ConnectionStatus) -> (String, egui::Color32, egui::Color32) {
        match status {
            ConnectionStatus::Connected => {
                ("CONNECTED".to_string(), self.live, egui::Color32::BLACK)
            }
            ConnectionStatus::Connecting => (
                "CONNECTING...".to_string(),
                self.busy,
                egui::Color32::BLACK,
            ),
            ConnectionStatus::Reconnecting { attempt } => (
                format!("RECONNECTING (ATTEMPT {})", attempt),
                self.busy,
                egui::Color32::BLACK,
            ),
            ConnectionStatus::Disconnecting => (
                "DISCONNECTING...".to_string(),
                egui::Color32::from_gray(160),
                egui::Color32::BLACK,
            ),
            ConnectionStatus::Disconnected => (
                "DISCONNECTED".to_string(),
                egui::Color32::from_gray(100),
                egui::Color32::WHITE,
            ),
        }
    }

    pub fn severity(&self, severity: MessageSeverity) -> egui::Color32 {
        match severity {
            MessageSeverity::Info => self.info,
            MessageSeverity::Success => egui::Color32::from_rgb(0, 150, 0),
            MessageSeverity::Warning => egui::Color32::from_rgb(200, 150, 0),
            MessageSeverity::Error => self.danger,
        }
    }
}

fn flat(widget: &mut egui::style::WidgetVisuals, stroke: egui::Stroke, fill: egui::Color32, fg: egui::Color32) {
    widget.bg_stroke = stroke;
    widget.rounding = egui::Rounding::ZERO;
    widget.bg_fill = fill;
    widget.weak_bg_fill = fill;
    widget.fg_stroke = egui::Stroke::new(1.0, fg);
}

pub fn configure_neubrutalism(ctx: &egui::Context, is_dark: bool) {
    let mut style = (*ctx.style()).clone();
    let palette = BrutalistPalette::new(is_dark);

    for (text_style, font_id) in style.text_styles.iter_mut() {
        font_id.size = match text_style {
            egui::TextStyle::Heading => 26.0,
            egui::TextStyle::Body | egui::TextStyle::Button => 15.0,
            egui::TextStyle::Monospace => 14.0,
            _ => font_id.size,
        };
    }

    style.spacing.item_spacing = egui::vec2(10.0, 10.0);
    style.spacing.button_padding = egui::vec2(14.0, 8.0);

    let widgets = &mut style.visuals.widgets;
    let control_fill = if is_dark {
        egui::Color32::from_gray(30)
    } else {
        egui::Color32::WHITE
    };
    flat(&mut widgets.noninteractive, egui::Stroke::new(2.0, palette.stroke), palette.bg, palette.fg);
    flat(&mut widgets.inactive, egui::Stroke::new(2.0, palette.stroke), control_fill, palette.fg);
    flat(&mut widgets.hovered, egui::Stroke::new(2.5, palette.stroke), palette.busy, egui::Color32::BLACK);
    widgets.hovered.expansion = 2.0;
    flat(&mut widgets.active, egui::Stroke::new(3.0, palette.stroke), palette.live, egui::Color32::BLACK);

    style.visuals.selection = egui::style::Selection {
        bg_fill: palette.selection,
        stroke: egui::Stroke::new(1.0, palette.stroke),
    };

    let visuals = &mut style.visuals;
    visuals.window_rounding = egui::Rounding::ZERO;
    visuals.window_stroke = egui::Stroke::new(2.0, palette.stroke);
    visuals.window_shadow = egui::Shadow {
        offset: egui::vec2(5.0, 5.0),
        blur: 0.0,
        spread: 0.0,
        color: palette.stroke,
    };
    visuals.window_fill = palette.bg;
    visuals.panel_fill = palette.bg;
    visuals.extreme_bg_color = palette.bg;
    visuals.override_text_color = Some(palette.fg);

    ctx.set_style(style);
}
