//! Recognition Session
//!
//! Runs recognition and language switches off the presentation thread and
//! publishes results through shared state. The processing flag is raised
//! before work is dispatched and lowered only after the result it guards
//! has been written.

use crossbeam_channel::{unbounded, Receiver, Sender};
use image::RgbaImage;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::layout::{group_lines, LayoutParams, ReadingOrder};
use crate::storage::LanguagePreferences;
use crate::vision::models::ConfigResolver;
use crate::vision::{EngineController, EngineError, OcrLanguage, ScreenTransform, TextRegion};

/// What the presentation side renders
#[derive(Debug, Clone, Default)]
pub struct SessionSnapshot {
    /// A recognition is in flight
    pub is_processing: bool,
    /// A language switch is in flight
    pub switching: bool,
    /// Incremented on every accepted submit
    pub generation: u64,
    /// Last successfully decoded photo
    pub image: Option<Arc<RgbaImage>>,
    /// Regions of the last result, in reading order
    pub regions: Vec<TextRegion>,
    pub transcript: String,
    /// User-visible status or failure text
    pub message: Option<String>,
}

impl SessionSnapshot {
    fn clear_result(&mut self) {
        self.image = None;
        self.regions.clear();
        self.transcript.clear();
    }
}

/// Completion notices for the presentation side
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    RecognitionFinished { generation: u64, succeeded: bool },
    LanguageSwitched { language: OcrLanguage, succeeded: bool },
}

/// A decoded photo and its recognized text
#[derive(Debug, Clone)]
pub struct RecognitionOutcome {
    pub image: RgbaImage,
    /// Image-space reading order
    pub order: ReadingOrder,
}

#[derive(Debug, Error)]
pub enum RecognitionFailure {
    #[error("Failed to decode image: {0}")]
    Decode(String),
    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// Decode `bytes`, recognize them and order the result
pub fn recognize_image(
    controller: &EngineController,
    bytes: &[u8],
    params: &LayoutParams,
) -> Result<RecognitionOutcome, RecognitionFailure> {
    let decoded =
        image::load_from_memory(bytes).map_err(|e| RecognitionFailure::Decode(e.to_string()))?;

    let regions = controller.recognize(&decoded.to_rgb8())?;
    let order = group_lines(&regions, &ScreenTransform::IDENTITY, params);

    Ok(RecognitionOutcome {
        image: decoded.to_rgba8(),
        order,
    })
}

type Notifier = Arc<dyn Fn() + Send + Sync>;

/// Background recognition with a shared result snapshot
pub struct RecognitionSession {
    controller: Arc<EngineController>,
    resolver: Arc<dyn ConfigResolver>,
    preferences: Option<Arc<Mutex<LanguagePreferences>>>,
    params: LayoutParams,
    state: Arc<RwLock<SessionSnapshot>>,
    events_tx: Sender<SessionEvent>,
    events_rx: Receiver<SessionEvent>,
    notifier: Option<Notifier>,
}

impl RecognitionSession {
    pub fn new(
        controller: Arc<EngineController>,
        resolver: Arc<dyn ConfigResolver>,
        params: LayoutParams,
    ) -> Self {
        let (events_tx, events_rx) = unbounded();
        Self {
            controller,
            resolver,
            preferences: None,
            params,
            state: Arc::new(RwLock::new(SessionSnapshot::default())),
            events_tx,
            events_rx,
            notifier: None,
        }
    }

    /// Persist language choices
    pub fn with_preferences(mut self, preferences: LanguagePreferences) -> Self {
        self.preferences = Some(Arc::new(Mutex::new(preferences)));
        self
    }

    /// Called from worker threads after every state change
    pub fn with_notifier(mut self, notifier: impl Fn() + Send + Sync + 'static) -> Self {
        self.notifier = Some(Arc::new(notifier));
        self
    }

    pub fn controller(&self) -> &Arc<EngineController> {
        &self.controller
    }

    pub fn params(&self) -> &LayoutParams {
        &self.params
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.state.read().clone()
    }

    pub fn is_processing(&self) -> bool {
        self.state.read().is_processing
    }

    pub fn events(&self) -> Receiver<SessionEvent> {
        self.events_rx.clone()
    }

    /// Queue a photo for recognition. Returns false while another
    /// recognition is still running.
    pub fn submit(&self, bytes: Vec<u8>) -> bool {
        let generation = {
            let mut state = self.state.write();
            if state.is_processing {
                return false;
            }
            state.is_processing = true;
            state.message = None;
            state.generation += 1;
            state.generation
        };

        let controller = self.controller.clone();
        let state = self.state.clone();
        let events = self.events_tx.clone();
        let notifier = self.notifier.clone();
        let params = self.params;

        std::thread::spawn(move || {
            let result = recognize_image(&controller, &bytes, &params);
            let succeeded = result.is_ok();

            {
                let mut state = state.write();
                match result {
                    Ok(outcome) => {
                        info!("Recognized {} regions", outcome.order.len());
                        state.transcript = outcome.order.transcript();
                        state.regions = outcome.order.regions;
                        state.image = Some(Arc::new(outcome.image));
                        state.message = None;
                    }
                    Err(e) => {
                        warn!("Recognition failed: {}", e);
                        state.clear_result();
                        state.message = Some(e.to_string());
                    }
                }
                state.is_processing = false;
            }

            let _ = events.send(SessionEvent::RecognitionFinished {
                generation,
                succeeded,
            });
            if let Some(notify) = notifier {
                notify();
            }
        });

        true
    }

    /// Persist `language` and load it in the background. Returns false while
    /// another switch is still running.
    pub fn switch_language(&self, language: OcrLanguage) -> bool {
        {
            let mut state = self.state.write();
            if state.switching {
                return false;
            }
            state.switching = true;
            state.message = Some(format!("Loading {}...", language));
        }

        if let Some(preferences) = &self.preferences {
            if let Err(e) = preferences.lock().set_language(language) {
                warn!("Failed to save language preference: {:#}", e);
            }
        }

        let controller = self.controller.clone();
        let resolver = self.resolver.clone();
        let state = self.state.clone();
        let events = self.events_tx.clone();
        let notifier = self.notifier.clone();

        std::thread::spawn(move || {
            let result = match resolver.resolve(language) {
                Ok(config) => controller
                    .switch_language(config)
                    .map_err(|e| e.to_string()),
                Err(e) => {
                    // Never keep the previous language loaded under the new selection
                    controller.release();
                    Err(format!("{:#}", e))
                }
            };

            let succeeded = result.is_ok();
            {
                let mut state = state.write();
                state.switching = false;
                state.message = match result {
                    Ok(()) => None,
                    Err(e) => {
                        error!("Failed to load {}: {}", language, e);
                        Some(format!("Failed to load {}: {}", language, e))
                    }
                };
            }

            let _ = events.send(SessionEvent::LanguageSwitched {
                language,
                succeeded,
            });
            if let Some(notify) = notifier {
                notify();
            }
        });

        true
    }
}
