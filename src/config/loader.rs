use crate::config::schema::{PatchDefinition, PatchSet, ValidationError, ValidationIssue};
use crate::patch::Patch;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug)]
pub enum ConfigError {
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Toml {
        path: Option<PathBuf>,
        source: toml_edit::de::Error,
    },
    Validation {
        path: Option<PathBuf>,
        source: ValidationError,
    },
    Replacement {
        patch_id: String,
        path: PathBuf,
        source: std::io::Error,
    },
}

impl ConfigError {
    fn with_path(self, path: &Path) -> Self {
        let path = path.to_path_buf();
        match self {
            ConfigError::Toml { path: None, source } => ConfigError::Toml {
                path: Some(path),
                source,
            },
            ConfigError::Validation { path: None, source } => ConfigError::Validation {
                path: Some(path),
                source,
            },
            other => other,
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io { path, source } => {
                write!(
                    f,
                    "failed to read patch set from {}: {}",
                    path.display(),
                    source
                )
            }
            ConfigError::Toml { path, source } => match path {
                Some(path) => write!(
                    f,
                    "failed to parse patch set TOML ({}): {}",
                    path.display(),
                    source
                ),
                None => write!(f, "failed to parse patch set TOML: {}", source),
            },
            ConfigError::Validation { path, source } => match path {
                Some(path) => write!(f, "invalid patch set ({}): {}", path.display(), source),
                None => write!(f, "invalid patch set: {}", source),
            },
            ConfigError::Replacement {
                patch_id,
                path,
                source,
            } => write!(
                f,
                "patch '{}': failed to read replacement from {}: {}",
                patch_id,
                path.display(),
                source
            ),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io { source, .. } => Some(source),
            ConfigError::Toml { source, .. } => Some(source),
            ConfigError::Validation { source, .. } => Some(source),
            ConfigError::Replacement { source, .. } => Some(source),
        }
    }
}

pub fn load_from_str(input: &str) -> Result<PatchSet, ConfigError> {
    let set: PatchSet = toml_edit::de::from_str(input)
        .map_err(|source| ConfigError::Toml { path: None, source })?;
    set.validate()
        .map_err(|source| ConfigError::Validation { path: None, source })?;
    debug!(name = %set.meta.name, patches = set.patches.len(), "loaded patch set");
    Ok(set)
}

pub fn load_from_path(path: impl AsRef<Path>) -> Result<PatchSet, ConfigError> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    load_from_str(&contents).map_err(|error| error.with_path(path))
}

impl PatchSet {
    /// Turn the validated definitions into patches. `file` replacements are
    /// read relative to `base_dir`.
    pub fn to_patches(&self, base_dir: &Path) -> Result<Vec<Patch>, ConfigError> {
        self.patches
            .iter()
            .map(|definition| to_patch(definition, base_dir))
            .collect()
    }
}

fn to_patch(definition: &PatchDefinition, base_dir: &Path) -> Result<Patch, ConfigError> {
    let invalid = |field: &'static str, message: String| ConfigError::Validation {
        path: None,
        source: ValidationError {
            issues: vec![ValidationIssue::InvalidValue {
                patch_id: Some(definition.id.clone()),
                field,
                message,
            }],
        },
    };

    let selector = definition
        .selector()
        .map_err(|message| invalid("range", message))?;

    let replacement = if let Some(text) = &definition.text {
        text.as_bytes().to_vec()
    } else if let Some(encoded) = &definition.hex {
        hex::decode(encoded.trim()).map_err(|err| invalid("hex", err.to_string()))?
    } else if let Some(file) = &definition.file {
        let path = base_dir.join(file);
        fs::read(&path).map_err(|source| ConfigError::Replacement {
            patch_id: definition.id.clone(),
            path,
            source,
        })?
    } else {
        Vec::new()
    };

    let mut patch = Patch::new(selector, replacement);
    if let Some(verify) = &definition.verify {
        patch = patch.with_verification(
            verify
                .to_verification()
                .map_err(|message| invalid("verify", message))?,
        );
    }
    Ok(patch)
}
