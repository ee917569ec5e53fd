//! SnapText - On-device photo OCR with a selectable text layer
//!
//! Recognizes text in a photo and lays an invisible, reading-order text
//! layer over it so the text can be selected and copied from the image.

mod config;
mod layout;
mod overlay;
mod session;
mod storage;
mod viewer;
mod vision;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use crate::config::AppConfig;
use crate::layout::group_lines;
use crate::overlay::{synthesize, AdvanceMeasurer};
use crate::session::RecognitionSession;
use crate::storage::{Database, LanguagePreferences};
use crate::vision::models::{ConfigResolver, ModelAsset};
use crate::vision::{
    EngineController, ModelManager, ModelResolver, OcrLanguage, PaddleOcrEngine, ScreenTransform,
};

/// SnapText - select and copy text straight from photos
#[derive(Parser, Debug)]
#[command(name = "snaptext")]
#[command(about = "On-device photo OCR with a selectable text layer")]
struct Args {
    /// Log at debug level (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file to use instead of the default location
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Recognize a photo and print its text
    Recognize {
        image: PathBuf,

        /// Language to use instead of the saved selection
        #[arg(short, long, value_parser = parse_language)]
        language: Option<OcrLanguage>,

        /// Print regions and the text layer as JSON
        #[arg(long)]
        json: bool,

        /// View width the text layer is fitted to
        #[arg(long, requires = "view_height")]
        view_width: Option<f32>,

        /// View height the text layer is fitted to
        #[arg(long, requires = "view_width")]
        view_height: Option<f32>,
    },
    /// List recognition languages
    Languages,
    /// Save the recognition language
    SetLanguage {
        #[arg(value_parser = parse_language)]
        language: OcrLanguage,
    },
    /// Show or download model files
    Models {
        /// Download missing files for the language
        #[arg(long)]
        download: bool,

        #[arg(short, long, value_parser = parse_language)]
        language: Option<OcrLanguage>,
    },
    /// Open the viewer window (default)
    View { image: Option<PathBuf> },
}

fn parse_language(value: &str) -> Result<OcrLanguage, String> {
    value.parse()
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let default_level = if args.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = load_or_create_config(args.config.as_deref());

    match args.command.unwrap_or(Command::View { image: None }) {
        Command::Recognize {
            image,
            language,
            json,
            view_width,
            view_height,
        } => {
            let view = view_width.zip(view_height);
            run_recognize(&config, &image, language, json, view)
        }
        Command::Languages => run_languages(),
        Command::SetLanguage { language } => {
            open_preferences()?.set_language(language)?;
            println!("Recognition language set to {}", language);
            Ok(())
        }
        Command::Models { download, language } => run_models(&config, download, language),
        Command::View { image } => run_view(config, image),
    }
}

/// Load configuration from file or fall back to defaults
fn load_or_create_config(path: Option<&Path>) -> AppConfig {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => match config::default_config_path() {
            Ok(path) => path,
            Err(e) => {
                warn!("No config directory: {:#}", e);
                return AppConfig::default();
            }
        },
    };

    match config::load_config_or_default(&path) {
        Ok(config) => {
            info!("Configuration from {:?}", path);
            config
        }
        Err(e) => {
            warn!("Using default configuration: {:#}", e);
            AppConfig::default()
        }
    }
}

fn open_preferences() -> Result<LanguagePreferences> {
    let db = Database::open(&storage::database_path()?)?;
    Ok(LanguagePreferences::new(db))
}

/// Saved language, or the default when the settings database is unavailable
fn saved_language() -> OcrLanguage {
    match open_preferences() {
        Ok(preferences) => preferences.current_language(),
        Err(e) => {
            warn!("Failed to open settings: {:#}", e);
            OcrLanguage::default()
        }
    }
}

fn model_manager(config: &AppConfig) -> Result<ModelManager> {
    match &config.engine.models_dir {
        Some(dir) => ModelManager::with_dir(dir.clone()),
        None => ModelManager::new(),
    }
}

fn new_controller(config: &AppConfig) -> EngineController {
    let engine = PaddleOcrEngine::new(config.engine.clone(), config.layout);
    EngineController::new(Box::new(engine))
}

fn run_recognize(
    config: &AppConfig,
    image: &Path,
    language: Option<OcrLanguage>,
    json: bool,
    view: Option<(f32, f32)>,
) -> Result<()> {
    let language = language.unwrap_or_else(saved_language);
    let resolver = ModelResolver::new(model_manager(config)?, config.engine.use_acceleration);

    let controller = new_controller(config);
    controller.load(resolver.resolve(language)?)?;

    let bytes = std::fs::read(image).with_context(|| format!("Failed to read {:?}", image))?;
    let outcome = session::recognize_image(&controller, &bytes, &config.layout)?;

    if !json {
        println!("{}", outcome.order.transcript());
        return Ok(());
    }

    let image_size = (outcome.image.width() as f32, outcome.image.height() as f32);
    let transform = match view {
        Some(view_size) => ScreenTransform::fit(image_size, view_size),
        None => ScreenTransform::IDENTITY,
    };
    let order = group_lines(&outcome.order.regions, &transform, &config.layout);
    let layer = synthesize(&order, &transform, &AdvanceMeasurer::default(), &config.layout);

    let report = serde_json::json!({
        "language": language.key(),
        "width": outcome.image.width(),
        "height": outcome.image.height(),
        "transcript": order.transcript(),
        "regions": order.regions,
        "separators": order.separators,
        "overlay": layer,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn run_languages() -> Result<()> {
    let selected = saved_language();
    for &language in OcrLanguage::all() {
        let marker = if language == selected { "*" } else { " " };
        println!("{} {:<8} {}", marker, language.key(), language.display_name());
    }
    Ok(())
}

fn run_models(config: &AppConfig, download: bool, language: Option<OcrLanguage>) -> Result<()> {
    let manager = model_manager(config)?;
    let languages: Vec<OcrLanguage> = match language {
        Some(language) => vec![language],
        None if download => vec![saved_language()],
        None => OcrLanguage::all().to_vec(),
    };

    if download {
        for &language in &languages {
            manager.ensure_assets(language)?;
            println!("Models for {} are ready", language);
        }
        return Ok(());
    }

    println!("Models directory: {}", manager.models_dir().display());
    for &language in &languages {
        println!("{}:", language);
        for status in manager.get_model_status(language) {
            let state = match (status.available, status.size) {
                (true, Some(size)) => format!("ok ({} bytes)", size),
                (false, Some(size)) => format!("invalid size ({} bytes)", size),
                _ => "missing".to_string(),
            };
            let name = match status.asset {
                ModelAsset::Detection => "detection",
                ModelAsset::Recognition(_) => "recognition",
                ModelAsset::Dictionary(_) => "dictionary",
            };
            println!("  {:<12} {:<28} {}", name, status.asset.filename(), state);
        }
    }
    Ok(())
}

fn run_view(config: AppConfig, image: Option<PathBuf>) -> Result<()> {
    info!("SnapText viewer starting...");

    let resolver = ModelResolver::new(model_manager(&config)?, config.engine.use_acceleration);
    let controller = Arc::new(new_controller(&config));

    let language = saved_language();
    let mut session = RecognitionSession::new(controller, Arc::new(resolver), config.layout);
    match open_preferences() {
        Ok(preferences) => session = session.with_preferences(preferences),
        Err(e) => warn!("Language choices will not be saved: {:#}", e),
    }

    if let Err(e) = viewer::run_viewer(session, config.viewer, language, image) {
        tracing::error!("Viewer error: {}", e);
    }

    info!("SnapText shutdown complete");
    Ok(())
}
