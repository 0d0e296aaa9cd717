use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use cxr_explain::{GradCamOptions, LimeOptions};
use cxr_inference::{ModelSpec, Normalization};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(deserialize_with = "deserialize_log_level")]
    pub log_level: LogLevel,
    pub model: ModelConfig,
    pub storage: StorageConfig,
    pub explain: ExplainConfig,
}

impl Config {
    /// Fail fast at startup on files the lazy registry would otherwise only
    /// miss at first use.
    pub fn validate(&self) -> Result<(), config::ConfigError> {
        for path in [self.model.checkpoint_path(), self.model.labels_path()] {
            if !path.is_file() {
                return Err(config::ConfigError::Message(format!(
                    "missing model file: {}",
                    path.display()
                )));
            }
        }
        Ok(())
    }
}

fn deserialize_log_level<'de, D>(deserializer: D) -> Result<LogLevel, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    s.try_into().map_err(serde::de::Error::custom)
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn get_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ModelConfig {
    pub dir: PathBuf,
    pub checkpoint_file: String,
    pub labels_file: String,
    pub input_size: u32,
    #[serde(default)]
    pub normalization: Normalization,
    #[serde(default = "default_conv_channels")]
    pub conv_channels: Vec<usize>,
}

fn default_conv_channels() -> Vec<usize> {
    vec![32, 64, 128, 128]
}

impl ModelConfig {
    pub fn checkpoint_path(&self) -> PathBuf {
        self.dir.join(&self.checkpoint_file)
    }

    pub fn labels_path(&self) -> PathBuf {
        self.dir.join(&self.labels_file)
    }

    pub fn to_spec(&self) -> ModelSpec {
        ModelSpec {
            checkpoint: self.checkpoint_path(),
            labels_file: self.labels_path(),
            input_size: self.input_size,
            normalization: self.normalization,
            conv_channels: self.conv_channels.clone(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    pub upload_dir: PathBuf,
    pub lime_output_dir: PathBuf,
    pub gradcam_output_dir: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExplainConfig {
    #[serde(default = "default_num_samples")]
    pub num_samples: usize,
    #[serde(default = "default_num_features")]
    pub num_features: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_cell_size")]
    pub cell_size: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_alpha")]
    pub alpha: f32,
    #[serde(default = "default_seed")]
    pub seed: u64,
}

fn default_num_samples() -> usize {
    1000
}

fn default_num_features() -> usize {
    5
}

fn default_batch_size() -> usize {
    16
}

fn default_cell_size() -> u32 {
    32
}

fn default_timeout_secs() -> u64 {
    120
}

fn default_alpha() -> f32 {
    0.4
}

fn default_seed() -> u64 {
    42
}

impl ExplainConfig {
    pub fn lime_options(&self) -> LimeOptions {
        LimeOptions {
            num_samples: self.num_samples,
            num_features: self.num_features,
            batch_size: self.batch_size,
            cell_size: self.cell_size,
            seed: self.seed,
            ..Default::default()
        }
    }

    pub fn gradcam_options(&self) -> GradCamOptions {
        GradCamOptions { alpha: self.alpha }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub enum Environment {
    Local,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Local => "local",
            Environment::Production => "production",
        }
    }
}

impl TryFrom<String> for Environment {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "production" => Ok(Self::Production),
            other => Err(format!(
                "{} is not a supported environment. Use either `local` or `production`.",
                other
            )),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub enum LogLevel {
    Debug,
    Info,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
        }
    }
}

impl TryFrom<String> for LogLevel {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            other => Err(format!(
                "{} is not a supported minimum log level. Use either `debug` or `info`.",
                other
            )),
        }
    }
}

pub fn get_configuration() -> Result<Config, config::ConfigError> {
    let base_path = std::env::current_dir().expect("Failed to determine the current directory");
    let configuration_directory = base_path.join("configuration");

    let environment: Environment = std::env::var("APP_ENVIRONMENT")
        .unwrap_or_else(|_| "local".into())
        .try_into()
        .expect("Failed to parse APP_ENVIRONMENT");

    let config = config::Config::builder()
        .add_source(config::File::from(
            configuration_directory.join("base.yaml"),
        ))
        .add_source(config::File::from(
            configuration_directory.join(format!("{}.yaml", environment.as_str())),
        ))
        .add_source(
            config::Environment::with_prefix("CXR")
                .prefix_separator("_")
                .separator("__"),
        )
        .build()?;

    let config: Config = config.try_deserialize::<Config>()?;

    Ok(config)
}
