//! PRD file loading
//!
//! JSON or YAML, picked by extension (`.yaml`/`.yml` are YAML, everything
//! else is tried as JSON first). Every loaded PRD is validated before it is
//! handed to the engine, so all schema and dependency defects surface at once.

use std::path::{Path, PathBuf};

use cascade_coordination::{DependencyResolver, Prd, ValidationError};

#[derive(Debug, thiserror::Error)]
pub enum PrdFileError {
    #[error("failed to read PRD {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid YAML in {path}: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error(transparent)]
    Invalid(#[from] ValidationError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Json,
    Yaml,
    /// No recognised extension: JSON first, then YAML
    Sniff,
}

fn format_for(path: &Path) -> Format {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("json") => Format::Json,
        Some("yaml") | Some("yml") => Format::Yaml,
        _ => Format::Sniff,
    }
}

/// Parse PRD text without validating it
pub fn parse_prd(path: &Path, text: &str) -> Result<Prd, PrdFileError> {
    let json = |text: &str| -> Result<Prd, PrdFileError> {
        serde_json::from_str(text).map_err(|source| PrdFileError::Json {
            path: path.to_path_buf(),
            source,
        })
    };
    let yaml = |text: &str| -> Result<Prd, PrdFileError> {
        serde_yaml::from_str(text).map_err(|source| PrdFileError::Yaml {
            path: path.to_path_buf(),
            source,
        })
    };
    match format_for(path) {
        Format::Json => json(text),
        Format::Yaml => yaml(text),
        Format::Sniff => json(text).or_else(|_| yaml(text)),
    }
}

/// Read, parse and validate a PRD file
pub fn load_prd(path: &Path) -> Result<Prd, PrdFileError> {
    let text = std::fs::read_to_string(path).map_err(|source| PrdFileError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let prd = parse_prd(path, &text)?;
    let order = DependencyResolver::resolve_prd(&prd)?;
    tracing::debug!(prd = %prd.name, tasks = order.len(), "PRD loaded");
    Ok(prd)
}
