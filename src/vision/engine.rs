//! Recognition engine lifecycle
//!
//! [`EngineController`] owns the single recognition engine of the process and
//! serializes every operation on it through one critical section. Load and
//! switch either end with the requested configuration loaded or with the
//! engine released; a half-initialized engine is never reachable.

use image::RgbImage;
use parking_lot::{Mutex, RwLock};
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::vision::language::OcrLanguage;
use crate::vision::models::ModelAssets;
use crate::vision::TextRegion;

/// Boundary to a heavyweight detection + recognition engine.
///
/// Implementations need not be thread-safe; the controller never calls
/// into an engine from two threads at once.
pub trait RecognitionEngine: Send {
    /// Initialize detection and recognition weights
    fn load(&mut self, assets: &ModelAssets, use_acceleration: bool) -> anyhow::Result<()>;

    /// Detect and recognize text in an image
    fn recognize(&mut self, image: &RgbImage) -> anyhow::Result<Vec<TextRegion>>;

    /// Drop everything bound to the current model; must tolerate repeat calls
    fn release(&mut self);
}

/// Everything needed to load one language
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub language: OcrLanguage,
    pub assets: ModelAssets,
    pub use_acceleration: bool,
}

/// Observable lifecycle state
#[derive(Debug, Clone, PartialEq, Default)]
pub enum EngineState {
    #[default]
    Unloaded,
    Loaded(EngineConfig),
    /// Teardown in progress inside the critical section
    Releasing,
}

impl EngineState {
    pub fn is_loaded(&self) -> bool {
        matches!(self, EngineState::Loaded(_))
    }

    /// Language of the loaded model, if any
    pub fn language(&self) -> Option<OcrLanguage> {
        match self {
            EngineState::Loaded(config) => Some(config.language),
            _ => None,
        }
    }
}

/// Controller failures
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EngineError {
    /// Recognition requested with no model loaded
    #[error("recognition engine is not loaded")]
    NotLoaded,
    /// `load` called while a model is already loaded; use a language switch
    #[error("recognition engine is already loaded with {0}")]
    AlreadyLoaded(OcrLanguage),
    /// The engine could not initialize the requested model
    #[error("failed to load recognition model: {0}")]
    LoadFailed(String),
    /// The engine failed while recognizing an image
    #[error("text recognition failed: {0}")]
    RecognitionFailed(String),
}

impl EngineError {
    /// Programmer errors, as opposed to failures reported by the engine
    pub fn is_precondition(&self) -> bool {
        matches!(self, EngineError::NotLoaded | EngineError::AlreadyLoaded(_))
    }
}

struct Inner {
    engine: Box<dyn RecognitionEngine>,
    active: Option<EngineConfig>,
}

/// Serialized owner of the recognition engine
pub struct EngineController {
    /// Critical section for every engine call
    inner: Mutex<Inner>,
    /// Last published state, readable without waiting on the engine
    state: RwLock<EngineState>,
}

impl EngineController {
    pub fn new(engine: Box<dyn RecognitionEngine>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                engine,
                active: None,
            }),
            state: RwLock::new(EngineState::Unloaded),
        }
    }

    /// Current lifecycle state; does not block behind a running recognition
    pub fn state(&self) -> EngineState {
        self.state.read().clone()
    }

    pub fn is_loaded(&self) -> bool {
        self.state.read().is_loaded()
    }

    pub fn active_language(&self) -> Option<OcrLanguage> {
        self.state.read().language()
    }

    /// Load a model into an unloaded engine
    pub fn load(&self, config: EngineConfig) -> Result<(), EngineError> {
        let mut inner = self.inner.lock();
        if let Some(active) = &inner.active {
            return Err(EngineError::AlreadyLoaded(active.language));
        }
        self.load_locked(&mut inner, config)
    }

    /// Release any loaded model, then load `config`, as one step.
    ///
    /// On failure the engine stays released; the previous model is not
    /// restored.
    pub fn switch_language(&self, config: EngineConfig) -> Result<(), EngineError> {
        let mut inner = self.inner.lock();
        if let Some(active) = &inner.active {
            info!(
                "Switching recognition language {:?} -> {:?}",
                active.language, config.language
            );
        }
        self.release_locked(&mut inner);
        self.load_locked(&mut inner, config)
    }

    /// Recognize text with the loaded model
    pub fn recognize(&self, image: &RgbImage) -> Result<Vec<TextRegion>, EngineError> {
        let mut inner = self.inner.lock();
        if inner.active.is_none() {
            warn!("Recognition requested while the engine is not loaded");
            return Err(EngineError::NotLoaded);
        }

        let start = Instant::now();
        let regions = inner
            .engine
            .recognize(image)
            .map_err(|e| EngineError::RecognitionFailed(format!("{:#}", e)))?;

        debug!(
            "Recognized {} regions in {}x{} image in {:?}",
            regions.len(),
            image.width(),
            image.height(),
            start.elapsed()
        );
        Ok(regions)
    }

    /// Release the loaded model; a no-op when nothing is loaded
    pub fn release(&self) {
        let mut inner = self.inner.lock();
        self.release_locked(&mut inner);
    }

    fn load_locked(&self, inner: &mut Inner, config: EngineConfig) -> Result<(), EngineError> {
        info!("Loading recognition model for {:?}", config.language);
        let start = Instant::now();

        match inner.engine.load(&config.assets, config.use_acceleration) {
            Ok(()) => {
                info!(
                    "Recognition model for {:?} loaded in {:?}",
                    config.language,
                    start.elapsed()
                );
                inner.active = Some(config.clone());
                self.publish(EngineState::Loaded(config));
                Ok(())
            }
            Err(e) => {
                warn!("Failed to load recognition model for {:?}: {:#}", config.language, e);
                // Drop whatever the engine managed to initialize
                inner.engine.release();
                inner.active = None;
                self.publish(EngineState::Unloaded);
                Err(EngineError::LoadFailed(format!("{:#}", e)))
            }
        }
    }

    fn release_locked(&self, inner: &mut Inner) {
        let Some(active) = inner.active.take() else {
            debug!("Release requested with no model loaded");
            return;
        };

        self.publish(EngineState::Releasing);
        inner.engine.release();
        self.publish(EngineState::Unloaded);
        info!("Released recognition model for {:?}", active.language);
    }

    fn publish(&self, state: EngineState) {
        *self.state.write() = state;
    }
}

impl Drop for EngineController {
    fn drop(&mut self) {
        let inner = self.inner.get_mut();
        if inner.active.take().is_some() {
            inner.engine.release();
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crossbeam_channel::{bounded, Receiver, Sender};
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    /// Shared record of engine calls
    #[derive(Clone, Default)]
    pub(crate) struct CallLog(Arc<Mutex<Vec<String>>>);

    impl CallLog {
        pub(crate) fn push(&self, entry: impl Into<String>) {
            self.0.lock().push(entry.into());
        }

        pub(crate) fn entries(&self) -> Vec<String> {
            self.0.lock().clone()
        }

        pub(crate) fn count(&self, prefix: &str) -> usize {
            self.0.lock().iter().filter(|e| e.starts_with(prefix)).count()
        }
    }

    /// Scripted engine for lifecycle tests
    pub(crate) struct FakeEngine {
        pub(crate) log: CallLog,
        /// Dictionaries whose load should fail
        pub(crate) fail_loads_for: Vec<PathBuf>,
        pub(crate) fail_recognition: bool,
        pub(crate) regions: Vec<TextRegion>,
        /// When set, recognition reports start and waits for a release signal
        pub(crate) gate: Option<(Sender<()>, Receiver<()>)>,
        loaded: Option<PathBuf>,
    }

    impl FakeEngine {
        pub(crate) fn new(log: CallLog) -> Self {
            Self {
                log,
                fail_loads_for: Vec::new(),
                fail_recognition: false,
                regions: Vec::new(),
                gate: None,
                loaded: None,
            }
        }
    }

    impl RecognitionEngine for FakeEngine {
        fn load(&mut self, assets: &ModelAssets, _use_acceleration: bool) -> anyhow::Result<()> {
            self.log.push(format!("load:{}", assets.dictionary.display()));
            if self.fail_loads_for.contains(&assets.dictionary) {
                anyhow::bail!("missing dictionary {}", assets.dictionary.display());
            }
            self.loaded = Some(assets.dictionary.clone());
            Ok(())
        }

        fn recognize(&mut self, _image: &RgbImage) -> anyhow::Result<Vec<TextRegion>> {
            assert!(self.loaded.is_some(), "recognize reached an unloaded engine");
            self.log.push("recognize:start");
            if let Some((started, proceed)) = &self.gate {
                let _ = started.send(());
                let _ = proceed.recv();
            }
            self.log.push("recognize:end");
            if self.fail_recognition {
                anyhow::bail!("inference error");
            }
            Ok(self.regions.clone())
        }

        fn release(&mut self) {
            self.log.push("release");
            self.loaded = None;
        }
    }

    pub(crate) fn config_for(language: OcrLanguage) -> EngineConfig {
        let dir = PathBuf::from("/models");
        let lang = language.config();
        EngineConfig {
            language,
            assets: ModelAssets {
                detection: dir.join(crate::vision::language::DETECTION_MODEL),
                recognition: dir.join(lang.recognition_model),
                dictionary: dir.join(lang.dictionary),
            },
            use_acceleration: false,
        }
    }

    fn controller_with(engine: FakeEngine) -> EngineController {
        EngineController::new(Box::new(engine))
    }

    fn blank_image() -> RgbImage {
        RgbImage::new(8, 8)
    }

    #[test]
    fn test_initial_state_is_unloaded() {
        let controller = controller_with(FakeEngine::new(CallLog::default()));
        assert_eq!(controller.state(), EngineState::Unloaded);
        assert!(!controller.is_loaded());
        assert_eq!(controller.active_language(), None);
    }

    #[test]
    fn test_load_success() {
        let controller = controller_with(FakeEngine::new(CallLog::default()));
        let config = config_for(OcrLanguage::Slavic);

        controller.load(config.clone()).unwrap();
        assert_eq!(controller.state(), EngineState::Loaded(config));
        assert_eq!(controller.active_language(), Some(OcrLanguage::Slavic));
    }

    #[test]
    fn test_load_failure_stays_unloaded_and_recognize_is_rejected() {
        let log = CallLog::default();
        let mut engine = FakeEngine::new(log.clone());
        let config = config_for(OcrLanguage::Slavic);
        engine.fail_loads_for.push(config.assets.dictionary.clone());
        let controller = controller_with(engine);

        let err = controller.load(config).unwrap_err();
        assert!(matches!(err, EngineError::LoadFailed(_)));
        assert!(!err.is_precondition());
        assert_eq!(controller.state(), EngineState::Unloaded);

        let err = controller.recognize(&blank_image()).unwrap_err();
        assert_eq!(err, EngineError::NotLoaded);
        assert!(err.is_precondition());
        assert_eq!(log.count("recognize"), 0);
    }

    #[test]
    fn test_load_while_loaded_is_rejected() {
        let log = CallLog::default();
        let controller = controller_with(FakeEngine::new(log.clone()));
        controller.load(config_for(OcrLanguage::Slavic)).unwrap();

        let err = controller.load(config_for(OcrLanguage::English)).unwrap_err();
        assert_eq!(err, EngineError::AlreadyLoaded(OcrLanguage::Slavic));
        assert_eq!(controller.active_language(), Some(OcrLanguage::Slavic));
        assert_eq!(log.count("load"), 1);
    }

    #[test]
    fn test_recognize_returns_engine_regions() {
        let mut engine = FakeEngine::new(CallLog::default());
        engine.regions = vec![TextRegion::from_extents("мир", 0.0, 0.0, 30.0, 10.0, 0.9)];
        let controller = controller_with(engine);
        controller.load(config_for(OcrLanguage::Slavic)).unwrap();

        let regions = controller.recognize(&blank_image()).unwrap();
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].text, "мир");
    }

    #[test]
    fn test_recognition_failure_keeps_model_loaded() {
        let mut engine = FakeEngine::new(CallLog::default());
        engine.fail_recognition = true;
        let controller = controller_with(engine);
        controller.load(config_for(OcrLanguage::Slavic)).unwrap();

        let err = controller.recognize(&blank_image()).unwrap_err();
        assert!(matches!(err, EngineError::RecognitionFailed(_)));
        assert!(!err.is_precondition());
        assert!(controller.is_loaded());
    }

    #[test]
    fn test_switch_releases_before_loading() {
        let log = CallLog::default();
        let controller = controller_with(FakeEngine::new(log.clone()));
        controller.load(config_for(OcrLanguage::Slavic)).unwrap();

        let english = config_for(OcrLanguage::English);
        controller.switch_language(english.clone()).unwrap();

        assert_eq!(controller.state(), EngineState::Loaded(english.clone()));
        let entries = log.entries();
        assert_eq!(
            entries,
            vec![
                format!("load:{}", config_for(OcrLanguage::Slavic).assets.dictionary.display()),
                "release".to_string(),
                format!("load:{}", english.assets.dictionary.display()),
            ]
        );
    }

    #[test]
    fn test_failed_switch_leaves_engine_unloaded() {
        let log = CallLog::default();
        let mut engine = FakeEngine::new(log.clone());
        let english = config_for(OcrLanguage::English);
        engine.fail_loads_for.push(english.assets.dictionary.clone());
        let controller = controller_with(engine);
        controller.load(config_for(OcrLanguage::Slavic)).unwrap();

        let err = controller.switch_language(english).unwrap_err();
        assert!(matches!(err, EngineError::LoadFailed(_)));
        assert_eq!(controller.state(), EngineState::Unloaded);
        assert_ne!(controller.active_language(), Some(OcrLanguage::Slavic));
        assert_eq!(
            controller.recognize(&blank_image()).unwrap_err(),
            EngineError::NotLoaded
        );
    }

    #[test]
    fn test_switch_from_unloaded_acts_as_load() {
        let log = CallLog::default();
        let controller = controller_with(FakeEngine::new(log.clone()));

        controller.switch_language(config_for(OcrLanguage::Latin)).unwrap();
        assert_eq!(controller.active_language(), Some(OcrLanguage::Latin));
        assert_eq!(log.count("release"), 0);
        assert_eq!(log.count("load"), 1);
    }

    #[test]
    fn test_release_is_idempotent() {
        let log = CallLog::default();
        let controller = controller_with(FakeEngine::new(log.clone()));
        controller.load(config_for(OcrLanguage::Slavic)).unwrap();

        controller.release();
        controller.release();
        assert_eq!(controller.state(), EngineState::Unloaded);
        assert_eq!(log.count("release"), 1);

        // Releasing a never-loaded controller is also fine
        let fresh = controller_with(FakeEngine::new(CallLog::default()));
        fresh.release();
        assert_eq!(fresh.state(), EngineState::Unloaded);
    }

    #[test]
    fn test_drop_releases_loaded_engine() {
        let log = CallLog::default();
        let controller = controller_with(FakeEngine::new(log.clone()));
        controller.load(config_for(OcrLanguage::Slavic)).unwrap();
        drop(controller);
        assert_eq!(log.count("release"), 1);
    }

    #[test]
    fn test_switch_waits_for_in_flight_recognition() {
        let log = CallLog::default();
        let (started_tx, started_rx) = bounded(1);
        let (proceed_tx, proceed_rx) = bounded(1);
        let mut engine = FakeEngine::new(log.clone());
        engine.gate = Some((started_tx, proceed_rx));

        let controller = Arc::new(controller_with(engine));
        controller.load(config_for(OcrLanguage::Slavic)).unwrap();

        let recognizer = {
            let controller = controller.clone();
            thread::spawn(move || controller.recognize(&blank_image()))
        };
        started_rx.recv().unwrap();

        let switcher = {
            let controller = controller.clone();
            thread::spawn(move || controller.switch_language(config_for(OcrLanguage::English)))
        };

        // The switch must not tear the engine down mid-recognition
        thread::sleep(Duration::from_millis(50));
        assert_eq!(log.count("release"), 0);
        assert!(controller.is_loaded());

        proceed_tx.send(()).unwrap();
        assert!(recognizer.join().unwrap().is_ok());
        assert!(switcher.join().unwrap().is_ok());

        let entries = log.entries();
        let end = entries.iter().position(|e| e == "recognize:end").unwrap();
        let release = entries.iter().position(|e| e == "release").unwrap();
        assert!(end < release);
        assert_eq!(controller.active_language(), Some(OcrLanguage::English));
    }

    #[test]
    fn test_release_waits_for_in_flight_recognition() {
        let log = CallLog::default();
        let (started_tx, started_rx) = bounded(1);
        let (proceed_tx, proceed_rx) = bounded(1);
        let mut engine = FakeEngine::new(log.clone());
        engine.gate = Some((started_tx, proceed_rx));

        let controller = Arc::new(controller_with(engine));
        controller.load(config_for(OcrLanguage::Slavic)).unwrap();

        let recognizer = {
            let controller = controller.clone();
            thread::spawn(move || controller.recognize(&blank_image()))
        };
        started_rx.recv().unwrap();

        let releaser = {
            let controller = controller.clone();
            thread::spawn(move || controller.release())
        };

        thread::sleep(Duration::from_millis(50));
        assert_eq!(log.count("release"), 0);
        assert!(controller.is_loaded());

        proceed_tx.send(()).unwrap();
        assert!(recognizer.join().unwrap().is_ok());
        releaser.join().unwrap();

        let entries = log.entries();
        let end = entries.iter().position(|e| e == "recognize:end").unwrap();
        let release = entries.iter().position(|e| e == "release").unwrap();
        assert!(end < release);
        assert_eq!(controller.state(), EngineState::Unloaded);
    }

    #[test]
    fn test_state_is_readable_during_recognition() {
        let (started_tx, started_rx) = bounded(1);
        let (proceed_tx, proceed_rx) = bounded(1);
        let mut engine = FakeEngine::new(CallLog::default());
        engine.gate = Some((started_tx, proceed_rx));

        let controller = Arc::new(controller_with(engine));
        controller.load(config_for(OcrLanguage::Slavic)).unwrap();

        let recognizer = {
            let controller = controller.clone();
            thread::spawn(move || controller.recognize(&blank_image()))
        };
        started_rx.recv().unwrap();

        // Does not wait on the critical section
        assert_eq!(controller.active_language(), Some(OcrLanguage::Slavic));

        proceed_tx.send(()).unwrap();
        assert!(recognizer.join().unwrap().is_ok());
    }
}
