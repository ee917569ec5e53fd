//! Viewer theme
//!
//! Neutral dark palette that keeps attention on the photo. The selection
//! fill is the only visible trace of the text layer, so it is kept strong.

use egui::{Color32, FontFamily, FontId, Rounding, Stroke, TextStyle, Visuals};

pub struct ViewerColors;

impl ViewerColors {
    pub const BG_DARK: Color32 = Color32::from_rgb(20, 20, 22);
    pub const BG_PANEL: Color32 = Color32::from_rgb(30, 30, 34);
    pub const BG_WIDGET: Color32 = Color32::from_rgb(44, 44, 50);

    pub const ACCENT: Color32 = Color32::from_rgb(64, 156, 255);
    pub const ERROR: Color32 = Color32::from_rgb(231, 76, 60);

    pub const TEXT_PRIMARY: Color32 = Color32::from_rgb(236, 236, 240);
    pub const TEXT_MUTED: Color32 = Color32::from_rgb(140, 140, 150);

    pub const BORDER: Color32 = Color32::from_rgb(58, 58, 66);
}

/// Apply the viewer theme to egui
pub fn apply_theme(ctx: &egui::Context) {
    let mut style = (*ctx.style()).clone();
    let mut visuals = Visuals::dark();

    visuals.window_fill = ViewerColors::BG_PANEL;
    visuals.panel_fill = ViewerColors::BG_DARK;
    visuals.extreme_bg_color = ViewerColors::BG_DARK;

    visuals.widgets.inactive.bg_fill = ViewerColors::BG_WIDGET;
    visuals.widgets.inactive.fg_stroke = Stroke::new(1.0, ViewerColors::TEXT_PRIMARY);
    visuals.widgets.inactive.rounding = Rounding::same(4.0);
    visuals.widgets.hovered.rounding = Rounding::same(4.0);
    visuals.widgets.active.bg_fill = ViewerColors::ACCENT;
    visuals.widgets.active.rounding = Rounding::same(4.0);

    visuals.selection.bg_fill = color_with_alpha(ViewerColors::ACCENT, 110);
    visuals.selection.stroke = Stroke::new(1.0, ViewerColors::ACCENT);

    visuals.window_rounding = Rounding::same(6.0);
    visuals.window_stroke = Stroke::new(1.0, ViewerColors::BORDER);

    style.visuals = visuals;
    style.spacing.item_spacing = egui::vec2(8.0, 6.0);
    style.spacing.button_padding = egui::vec2(10.0, 5.0);

    style.text_styles = [
        (TextStyle::Small, FontId::new(12.0, FontFamily::Proportional)),
        (TextStyle::Body, FontId::new(15.0, FontFamily::Proportional)),
        (TextStyle::Monospace, FontId::new(14.0, FontFamily::Monospace)),
        (TextStyle::Button, FontId::new(15.0, FontFamily::Proportional)),
        (TextStyle::Heading, FontId::new(20.0, FontFamily::Proportional)),
    ]
    .into();

    ctx.set_style(style);
}

pub fn color_with_alpha(color: Color32, alpha: u8) -> Color32 {
    Color32::from_rgba_unmultiplied(color.r(), color.g(), color.b(), alpha)
}
