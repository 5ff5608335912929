use crate::models::TaskOption;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OptionsError {
    #[error("Invalid value for option {name}: {reason}")]
    InvalidValue { name: String, reason: String },

    #[error("Cannot load options catalog {path}: {reason}")]
    Catalog { path: String, reason: String },
}

/// Checks client-supplied processing options before any data is staged
#[async_trait]
pub trait OptionsFilter: Send + Sync {
    /// Returns the options normalized to their declared types, or an error
    /// for the first invalid value. Unknown options are dropped.
    async fn filter(&self, options: &[TaskOption]) -> Result<Vec<TaskOption>, OptionsError>;
}

/// Filter used when no catalog is configured
pub struct PassThroughFilter;

#[async_trait]
impl OptionsFilter for PassThroughFilter {
    async fn filter(&self, options: &[TaskOption]) -> Result<Vec<TaskOption>, OptionsError> {
        Ok(options.to_vec())
    }
}

#[derive(Debug, Clone, PartialEq)]
enum OptionKind {
    Flag,
    Int,
    Float,
    Text,
}

#[derive(Debug, Clone)]
struct OptionSpec {
    kind: OptionKind,
    choices: Option<Vec<String>>,
}

/// One entry as dumped from the engine's argument parser; every attribute
/// is stringified.
#[derive(Debug, Deserialize)]
struct RawOptionSpec {
    #[serde(rename = "type")]
    kind: Option<String>,
    action: Option<String>,
    choices: Option<String>,
}

impl From<RawOptionSpec> for OptionSpec {
    fn from(raw: RawOptionSpec) -> Self {
        let action = raw.action.unwrap_or_default().to_lowercase();
        let kind_name = raw.kind.unwrap_or_default();

        let kind = if action.contains("store_true") || action.contains("storetrue") {
            OptionKind::Flag
        } else if kind_name.contains("'int'") {
            OptionKind::Int
        } else if kind_name.contains("'float'") {
            OptionKind::Float
        } else {
            OptionKind::Text
        };

        Self {
            kind,
            choices: raw.choices.as_deref().map(parse_choices),
        }
    }
}

/// Parses a Python list literal such as `['a', 'b', 3]`
fn parse_choices(literal: &str) -> Vec<String> {
    literal
        .trim()
        .trim_start_matches(['[', '('])
        .trim_end_matches([']', ')'])
        .split(',')
        .map(|choice| choice.trim().trim_matches(['\'', '"']).to_string())
        .filter(|choice| !choice.is_empty())
        .collect()
}

/// Validates options against the catalog produced by the processing engine
#[derive(Debug, Clone)]
pub struct CatalogFilter {
    specs: HashMap<String, OptionSpec>,
}

impl CatalogFilter {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let raw: HashMap<String, RawOptionSpec> = serde_json::from_str(json)?;
        let specs = raw
            .into_iter()
            .map(|(flag, spec)| (flag.trim_start_matches('-').to_string(), spec.into()))
            .collect();
        Ok(Self { specs })
    }

    pub async fn load(path: &Path) -> Result<Self, OptionsError> {
        let catalog_error = |reason: String| OptionsError::Catalog {
            path: path.display().to_string(),
            reason,
        };
        let json = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| catalog_error(e.to_string()))?;
        Self::from_json(&json).map_err(|e| catalog_error(e.to_string()))
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    fn coerce(name: &str, spec: &OptionSpec, value: &Value) -> Result<Value, OptionsError> {
        let invalid = |reason: &str| OptionsError::InvalidValue {
            name: name.to_string(),
            reason: format!("{reason} (got {value})"),
        };

        let coerced = match spec.kind {
            OptionKind::Flag => match value {
                Value::Bool(b) => Value::Bool(*b),
                Value::String(s) if s.eq_ignore_ascii_case("true") => Value::Bool(true),
                Value::String(s) if s.eq_ignore_ascii_case("false") => Value::Bool(false),
                _ => return Err(invalid("expected a boolean")),
            },
            OptionKind::Int => match value {
                Value::Number(n) if n.is_i64() => value.clone(),
                Value::String(s) => s
                    .trim()
                    .parse::<i64>()
                    .map(Value::from)
                    .map_err(|_| invalid("expected an integer"))?,
                _ => return Err(invalid("expected an integer")),
            },
            OptionKind::Float => match value {
                Value::Number(_) => value.clone(),
                Value::String(s) => s
                    .trim()
                    .parse::<f64>()
                    .ok()
                    .and_then(serde_json::Number::from_f64)
                    .map(Value::Number)
                    .ok_or_else(|| invalid("expected a number"))?,
                _ => return Err(invalid("expected a number")),
            },
            OptionKind::Text => match value {
                Value::String(_) => value.clone(),
                Value::Number(n) => Value::String(n.to_string()),
                Value::Bool(b) => Value::String(b.to_string()),
                _ => return Err(invalid("expected a string")),
            },
        };

        if let Some(choices) = &spec.choices {
            let as_text = match &coerced {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            if !choices.iter().any(|c| *c == as_text) {
                return Err(invalid(&format!("must be one of {}", choices.join(", "))));
            }
        }

        Ok(coerced)
    }
}

#[async_trait]
impl OptionsFilter for CatalogFilter {
    async fn filter(&self, options: &[TaskOption]) -> Result<Vec<TaskOption>, OptionsError> {
        let mut filtered = Vec::with_capacity(options.len());

        for option in options {
            let Some(spec) = self.specs.get(&option.name) else {
                tracing::warn!("Ignoring unknown option: {}", option.name);
                continue;
            };
            filtered.push(TaskOption {
                name: option.name.clone(),
                value: Self::coerce(&option.name, spec, &option.value)?,
            });
        }

        Ok(filtered)
    }
}
