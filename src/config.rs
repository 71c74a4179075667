use std::time::Duration;

use anyhow::Result;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

const MIB: u64 = 1024 * 1024;

/// Application configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    pub storage: StorageConfig,
    pub store: StoreConfig,
    pub upload: UploadConfig,
    pub extraction: ExtractionConfig,
    pub analysis: AnalysisConfig,
    pub api: ApiConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    pub root_dir: String,
    pub bucket: String,
    pub upload_url_expiry_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadConfig {
    pub max_file_size_bytes: u64,
    pub allowed_extensions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionConfig {
    /// Files above this size go through the asynchronous job path
    pub async_threshold_bytes: u64,
    pub poll_interval_ms: u64,
    pub max_poll_attempts: u32,
    /// Blocks per result page served by the local extractor
    pub result_page_size: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisConfig {
    pub base_url: String,
    pub model: String,
    pub timeout_secs: u64,
    pub max_tokens: u32,
    pub max_prompt_chars: usize,
    pub language_sample_chars: usize,
    pub language_code: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiConfig {
    pub default_page_size: usize,
    pub max_page_size: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub file_path: Option<String>,
    pub format: String, // "json" or "text"
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root_dir: "./data/objects".to_string(),
            bucket: "contracts".to_string(),
            upload_url_expiry_secs: 3600,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: "./data/metadata".to_string(),
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_file_size_bytes: 10 * MIB,
            allowed_extensions: vec![".pdf".to_string(), ".docx".to_string(), ".doc".to_string()],
        }
    }
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            async_threshold_bytes: 5 * MIB,
            poll_interval_ms: 5000,
            max_poll_attempts: 60,
            result_page_size: 1000,
        }
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            model: "llama3.1:8b".to_string(),
            timeout_secs: 300,
            max_tokens: 4000,
            max_prompt_chars: 8000,
            language_sample_chars: 5000,
            language_code: "en".to_string(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            default_page_size: 10,
            max_page_size: 100,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file_path: None,
            format: "text".to_string(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            storage: StorageConfig::default(),
            store: StoreConfig::default(),
            upload: UploadConfig::default(),
            extraction: ExtractionConfig::default(),
            analysis: AnalysisConfig::default(),
            api: ApiConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl ExtractionConfig {
    /// Delay between job status checks.
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl StorageConfig {
    /// Lifetime of an upload credential.
    pub const fn upload_url_expiry(&self) -> Duration {
        Duration::from_secs(self.upload_url_expiry_secs)
    }
}

impl AppConfig {
    /// Load configuration from multiple sources with precedence
    pub fn load() -> Result<Self> {
        Self::load_from(&["config/default", "config/local", "config"])
    }

    /// Load defaults, then each optional file in order, then the environment
    pub fn load_from(files: &[&str]) -> Result<Self> {
        let mut builder = Config::builder()
            // Start with default values
            .add_source(
                Config::try_from(&Self::default())
                    .map_err(|e| anyhow::anyhow!("Failed to serialize default configuration: {}", e))?,
            );

        for name in files {
            builder = builder.add_source(File::with_name(name).required(false));
        }

        let config = builder
            // CONTRACT_PIPELINE__EXTRACTION__MAX_POLL_ATTEMPTS=10
            .add_source(
                Environment::with_prefix("CONTRACT_PIPELINE")
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("upload.allowed_extensions")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;

        let app_config: Self = config
            .try_deserialize()
            .map_err(|e| anyhow::anyhow!("Failed to deserialize configuration: {}", e))?;

        app_config.validate()?;

        Ok(app_config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.storage.bucket.trim().is_empty() {
            return Err(anyhow::anyhow!("storage.bucket must not be empty"));
        }
        if self.storage.upload_url_expiry_secs == 0 {
            return Err(anyhow::anyhow!("upload_url_expiry_secs must be greater than 0"));
        }

        if self.upload.max_file_size_bytes == 0 {
            return Err(anyhow::anyhow!("max_file_size_bytes must be greater than 0"));
        }
        if self.upload.allowed_extensions.is_empty() {
            return Err(anyhow::anyhow!("allowed_extensions must not be empty"));
        }
        if let Some(bad) = self.upload.allowed_extensions.iter().find(|ext| !ext.starts_with('.')) {
            return Err(anyhow::anyhow!("Invalid extension: {}. Extensions must start with '.'", bad));
        }

        if self.extraction.max_poll_attempts == 0 {
            return Err(anyhow::anyhow!("max_poll_attempts must be greater than 0"));
        }
        if self.extraction.result_page_size == 0 {
            return Err(anyhow::anyhow!("result_page_size must be greater than 0"));
        }

        if self.analysis.max_prompt_chars == 0 || self.analysis.language_sample_chars == 0 {
            return Err(anyhow::anyhow!("analysis character caps must be greater than 0"));
        }
        if self.analysis.max_tokens == 0 {
            return Err(anyhow::anyhow!("max_tokens must be greater than 0"));
        }

        if self.api.default_page_size == 0 || self.api.max_page_size == 0 {
            return Err(anyhow::anyhow!("page sizes must be greater than 0"));
        }
        if self.api.default_page_size > self.api.max_page_size {
            return Err(anyhow::anyhow!(
                "default_page_size ({}) exceeds max_page_size ({})",
                self.api.default_page_size,
                self.api.max_page_size
            ));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(anyhow::anyhow!(
                "Invalid log level: {}. Must be one of: {:?}",
                self.logging.level,
                valid_levels
            ));
        }

        let valid_formats = ["text", "json"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            return Err(anyhow::anyhow!(
                "Invalid log format: {}. Must be one of: {:?}",
                self.logging.format,
                valid_formats
            ));
        }

        Ok(())
    }

    /// Get log level from environment or config
    pub fn get_log_level(&self) -> String {
        std::env::var("RUST_LOG").unwrap_or_else(|_| self.logging.level.clone())
    }
}
