//! Data preparation configuration format.

use crate::common::*;

/// A declarative `{type, ...kwargs}` description of a stage or dataset. The
/// tag is resolved through a registry; the remaining keys are handed to the
/// registered constructor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypedConfig {
    #[serde(rename = "type")]
    pub ty: String,
    #[serde(flatten)]
    pub options: serde_json::Map<String, serde_json::Value>,
}

/// The top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub data: DataConfig,
}

impl Config {
    pub fn open<P>(path: P) -> Result<Self>
    where
        P: AsRef<Path>,
    {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file '{}'", path.display()))?;
        let config = json5::from_str(&text)
            .with_context(|| format!("failed to parse config file '{}'", path.display()))?;
        Ok(config)
    }
}

/// Dataset and loader options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    /// Samples per worker batch.
    pub imgs_per_gpu: NonZeroUsize,
    /// Preparation workers per batch consumer.
    pub workers_per_gpu: NonZeroUsize,
    pub train: TypedConfig,
    pub test: TypedConfig,
}
