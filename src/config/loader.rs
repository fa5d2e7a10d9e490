use std::fs;
use std::path::Path;

use crate::error::{Context, Result};

use super::{validator, ExtractorConfig};

/// Load extractor settings from a JSON file, falling back to builtin defaults when the
/// file does not exist. Every section and field is optional.
pub fn load_config(path: &Path) -> Result<ExtractorConfig> {
    if !path.exists() {
        log::debug!(
            "config file {} not found, using builtin defaults",
            path.display()
        );
        return Ok(ExtractorConfig::builtin());
    }

    let json = fs::read_to_string(path)
        .with_context(|| format!("failed to read config JSON at {}", path.display()))?;
    let config = parse_config(&json)
        .with_context(|| format!("failed to parse config JSON at {}", path.display()))?;

    validator::validate_config(&config)?;
    Ok(config)
}

fn parse_config(json: &str) -> serde_json::Result<ExtractorConfig> {
    serde_json::from_str(json)
}
