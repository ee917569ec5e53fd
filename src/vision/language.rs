//! Supported recognition languages
//!
//! A closed set of languages, each mapped to an immutable record naming the
//! recognition model and character dictionary it needs. The detection model
//! is shared by all languages.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// File name of the shared text detection model
pub const DETECTION_MODEL: &str = "ppocrv5_mobile_det.onnx";

/// Model files for one recognition language
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LanguageConfig {
    /// Recognition model file name
    pub recognition_model: &'static str,
    /// Character dictionary file name
    pub dictionary: &'static str,
    /// Directory of this language in the model repository
    pub remote_dir: &'static str,
}

impl LanguageConfig {
    pub const SLAVIC: Self = Self {
        recognition_model: "eslav_ppocrv5_rec.onnx",
        dictionary: "ppocrv5_eslav_dict.txt",
        remote_dir: "eslav",
    };

    pub const ENGLISH: Self = Self {
        recognition_model: "en_ppocrv5_rec.onnx",
        dictionary: "ppocrv5_en_dict.txt",
        remote_dir: "english",
    };

    pub const LATIN: Self = Self {
        recognition_model: "latin_ppocrv5_rec.onnx",
        dictionary: "ppocrv5_latin_dict.txt",
        remote_dir: "latin",
    };
}

/// Supported OCR languages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OcrLanguage {
    /// East Slavic Cyrillic (Russian, Belarusian, Ukrainian)
    #[default]
    Slavic,
    English,
    /// Latin-script European languages
    Latin,
}

impl OcrLanguage {
    /// All languages in display order
    pub fn all() -> &'static [OcrLanguage] {
        &[OcrLanguage::Slavic, OcrLanguage::English, OcrLanguage::Latin]
    }

    /// Stable name used for persistence
    pub fn key(&self) -> &'static str {
        match self {
            OcrLanguage::Slavic => "SLAVIC",
            OcrLanguage::English => "ENGLISH",
            OcrLanguage::Latin => "LATIN",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            OcrLanguage::Slavic => "Slavic (RU/BY/UA)",
            OcrLanguage::English => "English",
            OcrLanguage::Latin => "Latin (EU)",
        }
    }

    pub fn config(&self) -> &'static LanguageConfig {
        match self {
            OcrLanguage::Slavic => &LanguageConfig::SLAVIC,
            OcrLanguage::English => &LanguageConfig::ENGLISH,
            OcrLanguage::Latin => &LanguageConfig::LATIN,
        }
    }

    /// Lenient lookup: missing or unknown names fall back to the default
    pub fn parse(value: Option<&str>) -> Self {
        value
            .and_then(|v| v.parse().ok())
            .unwrap_or_default()
    }
}

impl fmt::Display for OcrLanguage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

impl FromStr for OcrLanguage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        OcrLanguage::all()
            .iter()
            .copied()
            .find(|lang| lang.key().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| {
                let known: Vec<&str> = OcrLanguage::all().iter().map(|l| l.key()).collect();
                format!("unknown language '{}' (expected one of: {})", wanted, known.join(", "))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_falls_back_to_default() {
        assert_eq!(OcrLanguage::parse(None), OcrLanguage::Slavic);
        assert_eq!(OcrLanguage::parse(Some("KLINGON")), OcrLanguage::Slavic);
        assert_eq!(OcrLanguage::parse(Some("ENGLISH")), OcrLanguage::English);
    }

    #[test]
    fn test_from_str_is_case_insensitive_and_strict() {
        assert_eq!("latin".parse::<OcrLanguage>(), Ok(OcrLanguage::Latin));
        assert_eq!(" Slavic ".parse::<OcrLanguage>(), Ok(OcrLanguage::Slavic));
        assert!("".parse::<OcrLanguage>().is_err());
        assert!("french".parse::<OcrLanguage>().unwrap_err().contains("SLAVIC"));
    }

    #[test]
    fn test_keys_round_trip() {
        for lang in OcrLanguage::all() {
            assert_eq!(OcrLanguage::parse(Some(lang.key())), *lang);
        }
    }

    #[test]
    fn test_slavic_config() {
        let config = OcrLanguage::Slavic.config();
        assert_eq!(config.dictionary, "ppocrv5_eslav_dict.txt");
        assert_eq!(OcrLanguage::Slavic.to_string(), "Slavic (RU/BY/UA)");
    }

    #[test]
    fn test_configs_do_not_share_files() {
        let all = OcrLanguage::all();
        for (i, a) in all.iter().enumerate() {
            for b in &all[i + 1..] {
                assert_ne!(a.config().recognition_model, b.config().recognition_model);
                assert_ne!(a.config().dictionary, b.config().dictionary);
            }
        }
    }
}
