//! Composable text transforms for extracted field values

use crate::config::TransformSpec;
use crate::ConfigError;
use regex::Regex;

/// A compiled transform step
#[derive(Debug, Clone)]
pub enum Transform {
    Trim,
    CollapseWhitespace,
    Lowercase,
    Uppercase,
    StripPrefix(String),
    StripSuffix(String),
    RegexReplace { regex: Regex, replacement: String },
}

impl Transform {
    /// Compiles a configured transform
    pub fn compile(spec: &TransformSpec) -> Result<Self, ConfigError> {
        Ok(match spec {
            TransformSpec::Trim => Self::Trim,
            TransformSpec::CollapseWhitespace => Self::CollapseWhitespace,
            TransformSpec::Lowercase => Self::Lowercase,
            TransformSpec::Uppercase => Self::Uppercase,
            TransformSpec::StripPrefix { value } => Self::StripPrefix(value.clone()),
            TransformSpec::StripSuffix { value } => Self::StripSuffix(value.clone()),
            TransformSpec::RegexReplace {
                pattern,
                replacement,
            } => Self::RegexReplace {
                regex: Regex::new(pattern)
                    .map_err(|e| ConfigError::InvalidPattern(format!("{}: {}", pattern, e)))?,
                replacement: replacement.clone(),
            },
        })
    }

    pub fn apply(&self, input: &str) -> String {
        match self {
            Self::Trim => input.trim().to_string(),
            Self::CollapseWhitespace => input.split_whitespace().collect::<Vec<_>>().join(" "),
            Self::Lowercase => input.to_lowercase(),
            Self::Uppercase => input.to_uppercase(),
            Self::StripPrefix(prefix) => input.strip_prefix(prefix.as_str()).unwrap_or(input).to_string(),
            Self::StripSuffix(suffix) => input.strip_suffix(suffix.as_str()).unwrap_or(input).to_string(),
            Self::RegexReplace { regex, replacement } => {
                regex.replace_all(input, replacement.as_str()).into_owned()
            }
        }
    }
}

/// Compiles a list of configured transforms
pub fn compile_all(specs: &[TransformSpec]) -> Result<Vec<Transform>, ConfigError> {
    specs.iter().map(Transform::compile).collect()
}

/// Applies transforms left to right
pub fn apply_all(transforms: &[Transform], input: &str) -> String {
    transforms
        .iter()
        .fold(input.to_string(), |value, transform| transform.apply(&value))
}
