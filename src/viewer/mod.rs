//! Photo Viewer
//!
//! eframe window that shows a photo fitted to the view with the invisible
//! text layer on top. A drag across the photo selects the recognized text
//! in reading order.

pub mod theme;

use eframe::egui::{self, Color32, FontId, Label, RichText, Sense, TextWrapMode};
use std::path::PathBuf;
use tracing::{info, warn};

use crate::config::ViewerSettings;
use crate::layout::group_lines;
use crate::overlay::{synthesize, OverlayLayer, RunKind, TextMeasurer};
use crate::session::{RecognitionSession, SessionEvent, SessionSnapshot};
use crate::vision::{EngineState, OcrLanguage, ScreenTransform};
use theme::ViewerColors;

/// Measures text with the fonts egui will render it with
pub struct EguiMeasurer<'a> {
    ctx: &'a egui::Context,
}

impl<'a> EguiMeasurer<'a> {
    pub fn new(ctx: &'a egui::Context) -> Self {
        Self { ctx }
    }
}

impl TextMeasurer for EguiMeasurer<'_> {
    fn measure(&self, text: &str, font_size: f32) -> f32 {
        if !(font_size > 0.0) || text.is_empty() {
            return 0.0;
        }
        self.ctx.fonts(|fonts| {
            fonts
                .layout_no_wrap(text.to_owned(), FontId::proportional(font_size), Color32::WHITE)
                .size()
                .x
        })
    }
}

/// Widget state owned by the presentation thread
struct ViewerState {
    path_input: String,
    /// Local errors, shown in place of the session message
    notice: Option<String>,
    show_language_dialog: bool,
    selected_language: OcrLanguage,
    pending_language: OcrLanguage,
    /// Photo to submit once the first model load finishes
    pending_image: Option<Vec<u8>>,
    /// Photo and text layer fill the whole screen
    fullscreen: bool,
}

impl ViewerState {
    /// Record the outcome of a submit
    fn submitted(&mut self, accepted: bool) {
        self.notice = if accepted {
            None
        } else {
            Some("Still recognizing the previous photo; try again when it finishes".to_string())
        };
    }

    /// Take the photo waiting on a language switch, if it can now be submitted
    fn language_switched(&mut self, language: OcrLanguage, succeeded: bool) -> Option<Vec<u8>> {
        if succeeded {
            return self.pending_image.take();
        }
        if self.pending_image.take().is_some() {
            self.notice = Some(format!(
                "The {} model failed to load, so the photo was not recognized",
                language
            ));
        }
        None
    }
}

/// Size of the photo area; the preview height cap only applies when windowed
fn photo_view_size(available: egui::Vec2, max_preview_height: f32, fullscreen: bool) -> egui::Vec2 {
    if fullscreen {
        available
    } else {
        egui::vec2(available.x, available.y.min(max_preview_height))
    }
}

/// The viewer application
pub struct ViewerApp {
    session: RecognitionSession,
    settings: ViewerSettings,
    state: ViewerState,
    texture: Option<egui::TextureHandle>,
    /// Session generation the texture was built from
    texture_generation: u64,
    theme_applied: bool,
}

impl ViewerApp {
    pub fn new(
        session: RecognitionSession,
        settings: ViewerSettings,
        language: OcrLanguage,
        initial_image: Option<PathBuf>,
    ) -> Self {
        let mut state = ViewerState {
            path_input: String::new(),
            notice: None,
            show_language_dialog: false,
            selected_language: language,
            pending_language: language,
            pending_image: None,
            fullscreen: false,
        };

        if let Some(path) = initial_image {
            state.path_input = path.display().to_string();
            match std::fs::read(&path) {
                Ok(bytes) => state.pending_image = Some(bytes),
                Err(e) => state.notice = Some(format!("Failed to read {}: {}", path.display(), e)),
            }
        }

        if !session.controller().is_loaded() {
            session.switch_language(language);
        } else if let Some(bytes) = state.pending_image.take() {
            let accepted = session.submit(bytes);
            state.submitted(accepted);
        }

        Self {
            session,
            settings,
            state,
            texture: None,
            texture_generation: 0,
            theme_applied: false,
        }
    }

    /// Create eframe options for the viewer window
    pub fn options(settings: &ViewerSettings) -> eframe::NativeOptions {
        eframe::NativeOptions {
            viewport: egui::ViewportBuilder::default()
                .with_inner_size([settings.window_width, settings.window_height])
                .with_min_inner_size([480.0, 360.0])
                .with_title("SnapText"),
            ..Default::default()
        }
    }

    fn process_events(&mut self) {
        for event in self.session.events().try_iter() {
            match event {
                SessionEvent::LanguageSwitched {
                    language,
                    succeeded,
                } => {
                    info!("Language switch to {:?} finished (ok: {})", language, succeeded);
                    if let Some(bytes) = self.state.language_switched(language, succeeded) {
                        let accepted = self.session.submit(bytes);
                        self.state.submitted(accepted);
                    }
                }
                SessionEvent::RecognitionFinished { .. } => {}
            }
        }
    }

    fn open_image(&mut self) {
        let path = PathBuf::from(self.state.path_input.trim());
        match std::fs::read(&path) {
            Ok(bytes) => {
                let accepted = self.session.submit(bytes);
                self.state.submitted(accepted);
            }
            Err(e) => {
                warn!("Failed to read {:?}: {}", path, e);
                self.state.notice = Some(format!("Failed to read {}: {}", path.display(), e));
            }
        }
    }

    fn set_fullscreen(&mut self, ctx: &egui::Context, fullscreen: bool) {
        if self.state.fullscreen != fullscreen {
            self.state.fullscreen = fullscreen;
            ctx.send_viewport_cmd(egui::ViewportCommand::Fullscreen(fullscreen));
        }
    }

    fn render_top_bar(&mut self, ui: &mut egui::Ui, snapshot: &SessionSnapshot) {
        ui.horizontal(|ui| {
            let language_label = format!("Language: {}", self.state.selected_language);
            if ui.button(language_label).clicked() {
                self.state.pending_language = self.state.selected_language;
                self.state.show_language_dialog = true;
            }

            ui.separator();

            let input = ui.add(
                egui::TextEdit::singleline(&mut self.state.path_input)
                    .hint_text("Path to a photo")
                    .desired_width(320.0),
            );
            let submitted = input.lost_focus() && ui.input(|i| i.key_pressed(egui::Key::Enter));
            if ui.button("Open image").clicked() || submitted {
                self.open_image();
            }

            let can_expand = snapshot.image.is_some();
            if ui.add_enabled(can_expand, egui::Button::new("Fullscreen")).clicked() {
                self.set_fullscreen(ui.ctx(), true);
            }

            if snapshot.is_processing || snapshot.switching {
                ui.spinner();
            }
        });

        ui.horizontal(|ui| {
            let (text, color) = self.status_line(snapshot);
            ui.label(RichText::new(text).color(color).small());
        });
    }

    fn status_line(&self, snapshot: &SessionSnapshot) -> (String, Color32) {
        if let Some(notice) = &self.state.notice {
            return (notice.clone(), ViewerColors::ERROR);
        }
        if let Some(message) = &snapshot.message {
            let color = if snapshot.switching {
                ViewerColors::TEXT_MUTED
            } else {
                ViewerColors::ERROR
            };
            return (message.clone(), color);
        }
        if snapshot.is_processing {
            return ("Recognizing...".to_string(), ViewerColors::TEXT_MUTED);
        }

        let text = match self.session.controller().state() {
            EngineState::Loaded(config) => format!("Model ready: {}", config.language),
            EngineState::Releasing => "Releasing model...".to_string(),
            EngineState::Unloaded => "No model loaded".to_string(),
        };
        (text, ViewerColors::TEXT_MUTED)
    }

    fn render_language_dialog(&mut self, ctx: &egui::Context) {
        if !self.state.show_language_dialog {
            return;
        }

        let mut open = true;
        let mut apply = false;
        let mut cancel = false;
        egui::Window::new("Recognition language")
            .collapsible(false)
            .resizable(false)
            .open(&mut open)
            .show(ctx, |ui| {
                for &language in OcrLanguage::all() {
                    ui.radio_value(
                        &mut self.state.pending_language,
                        language,
                        language.display_name(),
                    );
                }
                ui.add_space(8.0);
                ui.horizontal(|ui| {
                    apply = ui.button("Apply").clicked();
                    cancel = ui.button("Cancel").clicked();
                });
            });

        if apply {
            let language = self.state.pending_language;
            if language != self.state.selected_language
                || self.session.controller().active_language() != Some(language)
            {
                if self.session.switch_language(language) {
                    self.state.selected_language = language;
                } else {
                    self.state.notice = Some("A language switch is already running".to_string());
                }
            }
        }
        if apply || cancel || !open {
            self.state.show_language_dialog = false;
        }
    }

    fn render_transcript(&self, ui: &mut egui::Ui, snapshot: &SessionSnapshot) {
        ui.label(RichText::new("Recognized text").strong());
        ui.add_space(4.0);
        egui::ScrollArea::vertical().show(ui, |ui| {
            if snapshot.transcript.is_empty() {
                ui.label(RichText::new("Nothing recognized yet").color(ViewerColors::TEXT_MUTED));
            } else {
                ui.add(Label::new(&snapshot.transcript).selectable(true));
            }
        });
    }

    fn render_photo(&mut self, ui: &mut egui::Ui, snapshot: &SessionSnapshot) {
        let Some(image) = &snapshot.image else {
            ui.centered_and_justified(|ui| {
                ui.label(RichText::new("Open a photo to select its text").color(ViewerColors::TEXT_MUTED));
            });
            return;
        };

        if self.texture.is_none() || self.texture_generation != snapshot.generation {
            let size = [image.width() as usize, image.height() as usize];
            let color_image = egui::ColorImage::from_rgba_unmultiplied(size, image.as_raw());
            self.texture = Some(ui.ctx().load_texture(
                "snaptext_photo",
                color_image,
                egui::TextureOptions::LINEAR,
            ));
            self.texture_generation = snapshot.generation;
        }
        let Some(texture) = &self.texture else {
            return;
        };

        let view_size = photo_view_size(
            ui.available_size(),
            self.settings.max_preview_height,
            self.state.fullscreen,
        );
        let (rect, _) = ui.allocate_exact_size(view_size, Sense::hover());

        let fitted = ScreenTransform::fit(
            (image.width() as f32, image.height() as f32),
            (view_size.x, view_size.y),
        );
        let transform = ScreenTransform::new(
            fitted.scale,
            fitted.offset_x + rect.min.x,
            fitted.offset_y + rect.min.y,
        );

        let image_rect = egui::Rect::from_min_size(
            egui::pos2(transform.offset_x, transform.offset_y),
            egui::vec2(
                image.width() as f32 * transform.scale,
                image.height() as f32 * transform.scale,
            ),
        );
        ui.painter().image(
            texture.id(),
            image_rect,
            egui::Rect::from_min_max(egui::pos2(0.0, 0.0), egui::pos2(1.0, 1.0)),
            Color32::WHITE,
        );

        let params = *self.session.params();
        let order = group_lines(&snapshot.regions, &transform, &params);
        let layer = synthesize(&order, &transform, &EguiMeasurer::new(ui.ctx()), &params);

        if self.settings.show_boxes {
            draw_boxes(ui, &layer);
        }
        place_text_layer(ui, &layer);
    }
}

/// Outline every text run
fn draw_boxes(ui: &egui::Ui, layer: &OverlayLayer) {
    for run in layer.text_runs() {
        let rect = egui::Rect::from_min_max(
            egui::pos2(run.rect.min_x, run.rect.min_y),
            egui::pos2(run.rect.max_x, run.rect.max_y),
        );
        ui.painter().rect_stroke(
            rect,
            egui::Rounding::ZERO,
            egui::Stroke::new(1.0, ViewerColors::ACCENT),
        );
    }
}

/// Place each run as a transparent, selectable label
fn place_text_layer(ui: &mut egui::Ui, layer: &OverlayLayer) {
    for run in &layer.runs {
        if run.font_size < 1.0 {
            continue;
        }

        let rect = match run.kind {
            RunKind::Text => egui::Rect::from_min_max(
                egui::pos2(run.rect.min_x, run.rect.min_y),
                egui::pos2(run.rect.max_x, run.rect.max_y),
            ),
            // Separators are anchors; give them a sliver to live in
            RunKind::Space | RunKind::LineBreak => egui::Rect::from_min_size(
                egui::pos2(run.rect.min_x, run.rect.min_y - run.font_size / 2.0),
                egui::vec2(1.0, run.font_size),
            ),
        };

        let text = RichText::new(run.text.as_str())
            .size(run.font_size)
            .color(Color32::TRANSPARENT)
            .extra_letter_spacing(run.letter_spacing);
        ui.put(
            rect,
            Label::new(text)
                .selectable(true)
                .wrap_mode(TextWrapMode::Extend),
        );
    }
}

impl eframe::App for ViewerApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        if !self.theme_applied {
            theme::apply_theme(ctx);
            self.theme_applied = true;
        }

        self.process_events();
        let snapshot = self.session.snapshot();

        if self.state.fullscreen {
            if snapshot.image.is_none() || ctx.input(|i| i.key_pressed(egui::Key::Escape)) {
                self.set_fullscreen(ctx, false);
            } else {
                egui::CentralPanel::default()
                    .frame(egui::Frame::none().fill(Color32::BLACK))
                    .show(ctx, |ui| {
                        self.render_photo(ui, &snapshot);
                    });
                return;
            }
        }

        egui::TopBottomPanel::top("top_bar").show(ctx, |ui| {
            ui.add_space(4.0);
            self.render_top_bar(ui, &snapshot);
            ui.add_space(2.0);
        });

        egui::SidePanel::right("transcript")
            .resizable(true)
            .default_width(260.0)
            .show(ctx, |ui| {
                self.render_transcript(ui, &snapshot);
            });

        egui::CentralPanel::default().show(ctx, |ui| {
            self.render_photo(ui, &snapshot);
        });

        self.render_language_dialog(ctx);
    }
}

/// Run the viewer application
pub fn run_viewer(
    session: RecognitionSession,
    settings: ViewerSettings,
    language: OcrLanguage,
    initial_image: Option<PathBuf>,
) -> Result<(), eframe::Error> {
    let options = ViewerApp::options(&settings);
    eframe::run_native(
        "SnapText",
        options,
        Box::new(move |cc| {
            let ctx = cc.egui_ctx.clone();
            let session = session.with_notifier(move || ctx.request_repaint());
            Ok(Box::new(ViewerApp::new(session, settings, language, initial_image)))
        }),
    )
}
