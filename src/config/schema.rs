use crate::patch::Verification;
use crate::plan::PlanOptions;
use crate::selector::{BoundsPolicy, Selector};
use serde::Deserialize;
use std::collections::HashSet;
use std::fmt;

#[derive(Debug, Deserialize, Default, Clone)]
pub struct PatchSet {
    #[serde(default)]
    pub meta: Metadata,
    #[serde(default)]
    pub patches: Vec<PatchDefinition>,
}

impl PatchSet {
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut issues = Vec::new();

        if self.patches.is_empty() {
            issues.push(ValidationIssue::EmptyPatchList);
        }

        let mut seen = HashSet::new();
        for patch in &self.patches {
            if patch.id.trim().is_empty() {
                issues.push(ValidationIssue::MissingField {
                    patch_id: None,
                    field: "id",
                });
            } else if !seen.insert(patch.id.as_str()) {
                issues.push(ValidationIssue::DuplicateId(patch.id.clone()));
            }

            if patch.range.is_some() && (patch.start.is_some() || patch.end.is_some()) {
                issues.push(ValidationIssue::InvalidCombo {
                    patch_id: Some(patch.id.clone()),
                    message: "range cannot be combined with start/end".to_string(),
                });
            }
            if let Err(message) = patch.selector() {
                issues.push(ValidationIssue::InvalidValue {
                    patch_id: Some(patch.id.clone()),
                    field: "range",
                    message,
                });
            }

            match patch.replacement_source_count() {
                0 => issues.push(ValidationIssue::MissingField {
                    patch_id: Some(patch.id.clone()),
                    field: "text",
                }),
                1 => {}
                _ => issues.push(ValidationIssue::InvalidCombo {
                    patch_id: Some(patch.id.clone()),
                    message: "only one of text, hex, file is allowed".to_string(),
                }),
            }
            if let Some(hex) = &patch.hex {
                if let Err(err) = hex::decode(hex.trim()) {
                    issues.push(ValidationIssue::InvalidValue {
                        patch_id: Some(patch.id.clone()),
                        field: "hex",
                        message: err.to_string(),
                    });
                }
            }
            if let Some(file) = &patch.file {
                if file.trim().is_empty() {
                    issues.push(ValidationIssue::MissingField {
                        patch_id: Some(patch.id.clone()),
                        field: "file",
                    });
                }
            }

            if let Some(verify) = &patch.verify {
                if let Err(message) = verify.to_verification() {
                    issues.push(ValidationIssue::InvalidValue {
                        patch_id: Some(patch.id.clone()),
                        field: "verify",
                        message,
                    });
                }
            }
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(ValidationError { issues })
        }
    }

    pub fn options(&self) -> PlanOptions {
        PlanOptions {
            bounds: self.meta.bounds,
        }
    }
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct Metadata {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// How selectors reaching outside the source are treated
    #[serde(default)]
    pub bounds: BoundsPolicy,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PatchDefinition {
    pub id: String,
    /// Python slice syntax, e.g. `"2:-1"`
    #[serde(default)]
    pub range: Option<String>,
    #[serde(default)]
    pub start: Option<isize>,
    #[serde(default)]
    pub end: Option<isize>,
    /// UTF-8 replacement
    #[serde(default)]
    pub text: Option<String>,
    /// Hex-encoded replacement
    #[serde(default)]
    pub hex: Option<String>,
    /// Replacement read from a file, relative to the patch set
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default)]
    pub verify: Option<Verify>,
}

impl PatchDefinition {
    /// The selector this definition describes. Omitting everything selects
    /// the whole object.
    pub fn selector(&self) -> Result<Selector, String> {
        match &self.range {
            Some(range) => range.parse().map_err(|err| format!("{err}")),
            None => Ok(Selector::new(self.start, self.end)),
        }
    }

    fn replacement_source_count(&self) -> usize {
        [self.text.is_some(), self.hex.is_some(), self.file.is_some()]
            .into_iter()
            .filter(|present| *present)
            .count()
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum Verify {
    ExactMatch {
        expected_text: String,
    },
    Hash {
        algorithm: Option<HashAlgorithm>,
        expected: String,
    },
}

impl Verify {
    pub fn to_verification(&self) -> Result<Verification, String> {
        match self {
            Verify::ExactMatch { expected_text } => {
                Ok(Verification::ExactMatch(expected_text.as_bytes().to_vec()))
            }
            Verify::Hash {
                algorithm,
                expected,
            } => match algorithm.unwrap_or_default() {
                HashAlgorithm::Xxh3 => {
                    u64::from_str_radix(expected.trim().trim_start_matches("0x"), 16)
                        .map(Verification::Hash)
                        .map_err(|_| format!("invalid xxh3 hash '{expected}'"))
                }
            },
        }
    }
}

/// Hash used by `method = "hash"`. Anything else fails to parse.
#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum HashAlgorithm {
    #[default]
    Xxh3,
}

#[derive(Debug, Clone)]
pub struct ValidationError {
    pub issues: Vec<ValidationIssue>,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, issue) in self.issues.iter().enumerate() {
            if idx > 0 {
                writeln!(f)?;
            }
            write!(f, "{issue}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

#[derive(Debug, Clone)]
pub enum ValidationIssue {
    EmptyPatchList,
    DuplicateId(String),
    MissingField {
        patch_id: Option<String>,
        field: &'static str,
    },
    InvalidCombo {
        patch_id: Option<String>,
        message: String,
    },
    InvalidValue {
        patch_id: Option<String>,
        field: &'static str,
        message: String,
    },
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationIssue::EmptyPatchList => write!(f, "patch set contains no patches"),
            ValidationIssue::DuplicateId(id) => write!(f, "patch id '{id}' is used more than once"),
            ValidationIssue::MissingField { patch_id, field } => match patch_id {
                Some(id) => write!(f, "patch '{id}' missing required field '{field}'"),
                None => write!(f, "patch missing required field '{field}'"),
            },
            ValidationIssue::InvalidCombo { patch_id, message } => match patch_id {
                Some(id) => write!(f, "patch '{id}' has invalid configuration: {message}"),
                None => write!(f, "invalid patch configuration: {message}"),
            },
            ValidationIssue::InvalidValue {
                patch_id,
                field,
                message,
            } => match patch_id {
                Some(id) => write!(f, "patch '{id}' has invalid '{field}': {message}"),
                None => write!(f, "invalid '{field}': {message}"),
            },
        }
    }
}
