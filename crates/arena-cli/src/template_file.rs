//! Template file loading. The format is picked by file extension.

use std::path::Path;

use anyhow::{bail, Context, Result};
use arena::TemplateDraft;

pub fn load_template(path: &Path) -> Result<TemplateDraft> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading template {}", path.display()))?;

    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match ext.as_deref() {
        Some("toml") => toml::from_str(&raw)
            .with_context(|| format!("parsing TOML template {}", path.display())),
        Some("json") => serde_json::from_str(&raw)
            .with_context(|| format!("parsing JSON template {}", path.display())),
        _ => bail!(
            "unsupported template format for {} (expected .toml or .json)",
            path.display()
        ),
    }
}
