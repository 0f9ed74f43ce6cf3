// src/config/mod.rs
mod models;

pub use models::*;

use anyhow::{Context, Result};
use std::path::Path;

/// Environment variable that overrides `apiKey` from the file.
pub const API_KEY_ENV: &str = "JUNCTION_API_KEY";

/// Reads and validates the configuration file. `.yaml`/`.yml` extensions
/// parse as YAML, anything else as JSON. A non-empty `JUNCTION_API_KEY` in
/// the environment wins over the file's `apiKey`, so the secret can stay
/// out of the file entirely.
pub async fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path = path.as_ref();
    let contents = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("cannot read config file {}", path.display()))?;

    let is_yaml = matches!(
        path.extension().and_then(|ext| ext.to_str()),
        Some("yaml") | Some("yml")
    );
    let mut config: Config = if is_yaml {
        serde_yaml::from_str(&contents)
            .with_context(|| format!("{} is not valid YAML", path.display()))?
    } else {
        serde_json::from_str(&contents)
            .with_context(|| format!("{} is not valid JSON", path.display()))?
    };

    match std::env::var(API_KEY_ENV) {
        Ok(key) if !key.is_empty() => config.api_key = key,
        _ => {}
    }

    config.validate()?;
    Ok(config)
}
