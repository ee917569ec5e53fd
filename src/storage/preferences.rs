//! Persisted user choices

use anyhow::Result;
use tracing::{debug, warn};

use super::Database;
use crate::vision::OcrLanguage;

const LANGUAGE_KEY: &str = "selected_language";

/// The selected recognition language, stored in the settings table
pub struct LanguagePreferences {
    db: Database,
}

impl LanguagePreferences {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Stored language; missing or unknown values fall back to the default
    pub fn current_language(&self) -> OcrLanguage {
        match self.db.get_setting(LANGUAGE_KEY) {
            Ok(stored) => {
                let language = OcrLanguage::parse(stored.as_deref());
                debug!("Selected language from settings: {:?}", language);
                language
            }
            Err(e) => {
                warn!("Failed to read language preference: {:#}", e);
                OcrLanguage::default()
            }
        }
    }

    pub fn set_language(&self, language: OcrLanguage) -> Result<()> {
        self.db.set_setting(LANGUAGE_KEY, language.key())
    }
}
