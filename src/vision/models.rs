//! Model management for ONNX Runtime
//!
//! Handles downloading, caching, and loading of the PaddleOCR detection
//! model and the per-language recognition models and dictionaries.

use anyhow::{Context, Result};
use futures_util::StreamExt;
use ndarray::Array4;
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Value;
use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::runtime::Runtime;
use tracing::{debug, info, warn};

use crate::vision::engine::EngineConfig;
use crate::vision::language::{OcrLanguage, DETECTION_MODEL};

/// Environment variable that disables model downloads
pub const OFFLINE_ENV: &str = "SNAPTEXT_OFFLINE";

const REMOTE_BASE: &str = "https://huggingface.co/monkt/paddleocr-onnx/resolve/main";

/// One downloadable model file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelAsset {
    /// Text detection model (DBNet), shared by all languages
    Detection,
    /// Text recognition model (SVTR) for one language
    Recognition(OcrLanguage),
    /// Character dictionary for one language
    Dictionary(OcrLanguage),
}

impl ModelAsset {
    /// The three files a language needs
    pub fn required_for(language: OcrLanguage) -> [ModelAsset; 3] {
        [
            ModelAsset::Detection,
            ModelAsset::Recognition(language),
            ModelAsset::Dictionary(language),
        ]
    }

    /// Local file name
    pub fn filename(&self) -> &'static str {
        match self {
            ModelAsset::Detection => DETECTION_MODEL,
            ModelAsset::Recognition(lang) => lang.config().recognition_model,
            ModelAsset::Dictionary(lang) => lang.config().dictionary,
        }
    }

    /// Download URL on Hugging Face (monkt/paddleocr-onnx)
    pub fn download_url(&self) -> String {
        match self {
            ModelAsset::Detection => format!("{}/detection/v5/det.onnx", REMOTE_BASE),
            ModelAsset::Recognition(lang) => {
                format!("{}/languages/{}/rec.onnx", REMOTE_BASE, lang.config().remote_dir)
            }
            ModelAsset::Dictionary(lang) => {
                format!("{}/languages/{}/dict.txt", REMOTE_BASE, lang.config().remote_dir)
            }
        }
    }

    /// Plausible file size for an integrity check, in bytes
    pub fn expected_size_range(&self) -> (u64, u64) {
        match self {
            ModelAsset::Detection => (1_000_000, 20_000_000),   // ~4.7 MB
            ModelAsset::Recognition(_) => (1_000_000, 30_000_000), // ~7.5 MB
            ModelAsset::Dictionary(_) => (16, 2_000_000),
        }
    }

    /// Display name for progress reporting
    pub fn display_name(&self) -> String {
        match self {
            ModelAsset::Detection => "Text Detection".to_string(),
            ModelAsset::Recognition(lang) => format!("Text Recognition ({})", lang),
            ModelAsset::Dictionary(lang) => format!("Character Dictionary ({})", lang),
        }
    }
}

/// Resolved on-disk files for one language
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelAssets {
    pub detection: PathBuf,
    pub recognition: PathBuf,
    pub dictionary: PathBuf,
}

/// Model manifest tracking downloaded models
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ModelManifest {
    pub version: String,
    pub models: Vec<ModelInfo>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ModelInfo {
    pub asset: String,
    pub filename: String,
    pub size_bytes: u64,
    pub sha256: String,
    /// Seconds since the Unix epoch
    pub downloaded_at: u64,
}

impl Default for ModelManifest {
    fn default() -> Self {
        Self {
            version: "1.0.0".to_string(),
            models: Vec::new(),
        }
    }
}

/// Progress callback for download operations
pub type DownloadProgressCallback = Box<dyn Fn(u64, Option<u64>) + Send + Sync>;

/// Availability of one asset on disk
#[derive(Debug, Clone, PartialEq)]
pub struct AssetStatus {
    pub asset: ModelAsset,
    pub path: PathBuf,
    pub available: bool,
    pub size: Option<u64>,
}

/// Model manager for downloading and caching ONNX models
pub struct ModelManager {
    models_dir: PathBuf,
    offline: bool,
}

impl ModelManager {
    /// Create a model manager over `<data_dir>/models`
    pub fn new() -> Result<Self> {
        let data_dir = crate::storage::get_data_dir()?;
        Self::with_dir(data_dir.join("models"))
    }

    /// Create model manager with custom directory
    pub fn with_dir(models_dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&models_dir)
            .with_context(|| format!("Failed to create models directory {:?}", models_dir))?;
        Ok(Self {
            models_dir,
            offline: std::env::var_os(OFFLINE_ENV).is_some(),
        })
    }

    /// Refuse downloads regardless of the environment
    pub fn offline(mut self, offline: bool) -> Self {
        self.offline = offline;
        self
    }

    /// Get the models directory path
    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    /// Get the path to a specific model file
    pub fn model_path(&self, asset: ModelAsset) -> PathBuf {
        self.models_dir.join(asset.filename())
    }

    /// Paths for a language, whether or not the files exist yet
    pub fn assets_for(&self, language: OcrLanguage) -> ModelAssets {
        ModelAssets {
            detection: self.model_path(ModelAsset::Detection),
            recognition: self.model_path(ModelAsset::Recognition(language)),
            dictionary: self.model_path(ModelAsset::Dictionary(language)),
        }
    }

    /// Check if a model is already downloaded
    pub fn is_model_available(&self, asset: ModelAsset) -> bool {
        match std::fs::metadata(self.model_path(asset)) {
            Ok(metadata) if metadata.is_file() => {
                let (min, max) = asset.expected_size_range();
                let size = metadata.len();
                size >= min && size <= max
            }
            _ => false,
        }
    }

    /// Check if every file for a language is available
    pub fn are_models_ready(&self, language: OcrLanguage) -> bool {
        ModelAsset::required_for(language)
            .iter()
            .all(|&asset| self.is_model_available(asset))
    }

    /// Get status of the files a language needs
    pub fn get_model_status(&self, language: OcrLanguage) -> Vec<AssetStatus> {
        ModelAsset::required_for(language)
            .iter()
            .map(|&asset| {
                let path = self.model_path(asset);
                let size = std::fs::metadata(&path).ok().map(|m| m.len());
                AssetStatus {
                    asset,
                    available: self.is_model_available(asset),
                    path,
                    size,
                }
            })
            .collect()
    }

    /// Download a model if not already available
    /// Returns the path to the model file
    pub fn ensure_model(&self, asset: ModelAsset) -> Result<PathBuf> {
        let path = self.model_path(asset);

        if self.is_model_available(asset) {
            debug!("Model {:?} already available at {:?}", asset, path);
            return Ok(path);
        }

        info!("Downloading model {:?}...", asset);
        self.download_model_with_progress(asset, None)?;

        Ok(path)
    }

    /// Make every file for a language available, downloading what is missing
    pub fn ensure_assets(&self, language: OcrLanguage) -> Result<ModelAssets> {
        for asset in ModelAsset::required_for(language) {
            self.ensure_model(asset)
                .with_context(|| format!("{} is not available", asset.display_name()))?;
        }
        Ok(self.assets_for(language))
    }

    /// Download a specific model with optional progress callback
    pub fn download_model_with_progress(
        &self,
        asset: ModelAsset,
        progress: Option<DownloadProgressCallback>,
    ) -> Result<()> {
        let url = asset.download_url();
        let path = self.model_path(asset);

        if self.offline {
            anyhow::bail!(
                "Offline mode: cannot download models. Please download manually from {} and place at {:?}",
                url,
                path
            );
        }

        info!("Downloading {} model from {}", asset.display_name(), url);

        // Create a tokio runtime for async download
        let rt = Runtime::new().context("Failed to create tokio runtime")?;
        let hash = rt.block_on(async { self.download_file_async(&url, &path, progress).await })?;

        if !self.is_model_available(asset) {
            anyhow::bail!(
                "Download completed but {} has an unexpected size",
                asset.filename()
            );
        }

        self.update_manifest_for_model(asset, hash)?;

        info!("Successfully downloaded {} model", asset.display_name());
        Ok(())
    }

    /// Stream `url` into a temp file next to `path`, then rename it into place.
    /// Returns the hex SHA-256 of the downloaded bytes.
    async fn download_file_async(
        &self,
        url: &str,
        path: &Path,
        progress: Option<DownloadProgressCallback>,
    ) -> Result<String> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(300))
            .build()
            .context("Failed to create HTTP client")?;

        let response = client
            .get(url)
            .send()
            .await
            .context("Failed to send download request")?;

        if !response.status().is_success() {
            anyhow::bail!("Download failed with status {}: {}", response.status(), url);
        }

        let total_size = response.content_length();
        debug!("Download size: {:?} bytes", total_size);

        let temp_path = path.with_extension("tmp");
        let mut file = std::fs::File::create(&temp_path).context("Failed to create temp file")?;

        let mut hasher = Sha256::new();
        let mut downloaded: u64 = 0;
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    drop(file);
                    std::fs::remove_file(&temp_path).ok();
                    return Err(e).context("Error reading download stream");
                }
            };

            file.write_all(&chunk).context("Failed to write to temp file")?;
            hasher.update(&chunk);
            downloaded += chunk.len() as u64;

            if let Some(ref callback) = progress {
                callback(downloaded, total_size);
            }
        }

        file.flush().context("Failed to flush temp file")?;
        drop(file);

        std::fs::rename(&temp_path, path)
            .context("Failed to move downloaded file to final location")?;

        Ok(format!("{:x}", hasher.finalize()))
    }

    /// Record a finished download in the manifest
    fn update_manifest_for_model(&self, asset: ModelAsset, sha256: String) -> Result<()> {
        let mut manifest = self.load_manifest().unwrap_or_else(|e| {
            warn!("Ignoring unreadable model manifest: {:#}", e);
            ModelManifest::default()
        });

        let metadata = std::fs::metadata(self.model_path(asset))?;
        let model_info = ModelInfo {
            asset: format!("{:?}", asset),
            filename: asset.filename().to_string(),
            size_bytes: metadata.len(),
            sha256,
            downloaded_at: unix_now(),
        };

        if let Some(existing) = manifest
            .models
            .iter_mut()
            .find(|m| m.filename == model_info.filename)
        {
            *existing = model_info;
        } else {
            manifest.models.push(model_info);
        }

        self.save_manifest(&manifest)
    }

    fn manifest_path(&self) -> PathBuf {
        self.models_dir.join("manifest.json")
    }

    /// Load the model manifest
    pub fn load_manifest(&self) -> Result<ModelManifest> {
        let manifest_path = self.manifest_path();
        if manifest_path.exists() {
            let content = std::fs::read_to_string(&manifest_path)?;
            let manifest: ModelManifest = serde_json::from_str(&content)?;
            Ok(manifest)
        } else {
            Ok(ModelManifest::default())
        }
    }

    /// Save the model manifest
    pub fn save_manifest(&self, manifest: &ModelManifest) -> Result<()> {
        let content = serde_json::to_string_pretty(manifest)?;
        std::fs::write(self.manifest_path(), content)?;
        Ok(())
    }
}

/// Maps a language to a loadable engine configuration
pub trait ConfigResolver: Send + Sync {
    fn resolve(&self, language: OcrLanguage) -> Result<EngineConfig>;
}

/// Resolver backed by the on-disk model cache
pub struct ModelResolver {
    manager: ModelManager,
    use_acceleration: bool,
}

impl ModelResolver {
    pub fn new(manager: ModelManager, use_acceleration: bool) -> Self {
        Self {
            manager,
            use_acceleration,
        }
    }

    pub fn manager(&self) -> &ModelManager {
        &self.manager
    }
}

impl ConfigResolver for ModelResolver {
    fn resolve(&self, language: OcrLanguage) -> Result<EngineConfig> {
        let assets = self.manager.ensure_assets(language)?;
        Ok(EngineConfig {
            language,
            assets,
            use_acceleration: self.use_acceleration,
        })
    }
}

/// ONNX Runtime session wrapper
pub struct OnnxSession {
    session: Session,
    input_names: Vec<String>,
    output_names: Vec<String>,
}

impl OnnxSession {
    /// Create a session from a model file, optionally on the GPU
    pub fn new(model_path: &Path, use_acceleration: bool) -> Result<Self> {
        info!("Loading ONNX model from {:?}", model_path);

        let builder = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(4)?;

        let builder = if use_acceleration {
            with_gpu(builder)?
        } else {
            builder
        };

        let session = builder
            .commit_from_file(model_path)
            .with_context(|| format!("Failed to load ONNX model {:?}", model_path))?;

        let input_names: Vec<String> = session.inputs.iter().map(|i| i.name.clone()).collect();
        let output_names: Vec<String> = session.outputs.iter().map(|o| o.name.clone()).collect();

        info!(
            "Model loaded. Inputs: {:?}, Outputs: {:?}",
            input_names, output_names
        );

        Ok(Self {
            session,
            input_names,
            output_names,
        })
    }

    pub fn input_names(&self) -> &[String] {
        &self.input_names
    }

    pub fn output_names(&self) -> &[String] {
        &self.output_names
    }

    /// Run a single NCHW f32 input and copy out the first output
    pub fn run(&mut self, input: Array4<f32>) -> Result<(Vec<usize>, Vec<f32>)> {
        let shape: [usize; 4] = [
            input.shape()[0],
            input.shape()[1],
            input.shape()[2],
            input.shape()[3],
        ];
        let (data, _offset) = input.into_raw_vec_and_offset();
        let value = Value::from_array((shape, data))?;

        let output_name = self
            .output_names
            .first()
            .cloned()
            .context("Model has no outputs")?;

        let outputs = self.session.run(ort::inputs![value])?;
        let output = outputs
            .get(output_name.as_str())
            .with_context(|| format!("Missing model output {}", output_name))?;
        let (dims, values) = output.try_extract_tensor::<f32>()?;

        let dims = dims.iter().map(|&d| d.max(0) as usize).collect();
        Ok((dims, values.to_vec()))
    }
}

#[cfg(target_os = "windows")]
fn with_gpu(
    builder: ort::session::builder::SessionBuilder,
) -> Result<ort::session::builder::SessionBuilder> {
    use ort::execution_providers::DirectMLExecutionProvider;
    match builder.with_execution_providers([DirectMLExecutionProvider::default().build()]) {
        Ok(builder) => {
            info!("DirectML GPU acceleration enabled");
            Ok(builder)
        }
        Err(e) => {
            warn!("DirectML not available, using CPU: {}", e);
            Ok(Session::builder()?
                .with_optimization_level(GraphOptimizationLevel::Level3)?
                .with_intra_threads(4)?)
        }
    }
}

#[cfg(not(target_os = "windows"))]
fn with_gpu(
    builder: ort::session::builder::SessionBuilder,
) -> Result<ort::session::builder::SessionBuilder> {
    warn!("GPU acceleration is not available on this platform, using CPU");
    Ok(builder)
}

fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
