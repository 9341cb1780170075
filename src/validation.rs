//! Attribute validation helpers.
//!
//! Validators return a list of [`Diagnostic`]s rather than failing on the
//! first problem, so that every issue in a configuration can be reported at
//! once. An empty list means the value is valid.
//!
//! # Example
//!
//! ```
//! use observe_provider::oid::ObjectType;
//! use observe_provider::validation::validate_oid;
//!
//! let diagnostics = validate_oid("o:dataset:42", &[ObjectType::Dataset], "inputs.main");
//! assert!(diagnostics.is_empty());
//!
//! let diagnostics = validate_oid("o:monitor:42", &[ObjectType::Dataset], "inputs.main");
//! assert_eq!(diagnostics.len(), 1);
//! assert_eq!(diagnostics[0].summary, "wrong type");
//! assert_eq!(diagnostics[0].attribute, Some("inputs.main".to_string()));
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::parse_duration;
use crate::oid::{ObjectType, Oid};

/// Diagnostic severity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticSeverity {
    /// An error that prevents the operation from completing.
    Error,
    /// A warning that doesn't prevent the operation but should be addressed.
    Warning,
}

/// A problem found while validating user input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// The severity of the diagnostic.
    pub severity: DiagnosticSeverity,
    /// A short summary of the issue.
    pub summary: String,
    /// A detailed description of the issue.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// The attribute path where the issue occurred.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attribute: Option<String>,
}

impl Diagnostic {
    /// Create an error diagnostic.
    pub fn error(summary: impl Into<String>) -> Self {
        Self {
            severity: DiagnosticSeverity::Error,
            summary: summary.into(),
            detail: None,
            attribute: None,
        }
    }

    /// Create a warning diagnostic.
    pub fn warning(summary: impl Into<String>) -> Self {
        Self {
            severity: DiagnosticSeverity::Warning,
            summary: summary.into(),
            detail: None,
            attribute: None,
        }
    }

    /// Add detail to this diagnostic.
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// Set the attribute path for this diagnostic.
    pub fn with_attribute(mut self, attribute: impl Into<String>) -> Self {
        self.attribute = Some(attribute.into());
        self
    }

    /// Whether this diagnostic is an error.
    pub fn is_error(&self) -> bool {
        self.severity == DiagnosticSeverity::Error
    }
}

/// Check that `value` is an OID of one of `allowed_types`.
///
/// An empty `allowed_types` accepts any well-formed OID.
pub fn validate_oid(value: &str, allowed_types: &[ObjectType], attribute: &str) -> Vec<Diagnostic> {
    let oid = match value.parse::<Oid>() {
        Ok(oid) => oid,
        Err(e) => return vec![Diagnostic::error(e.to_string()).with_attribute(attribute)],
    };

    if allowed_types.is_empty() || allowed_types.iter().any(|t| oid.is_type(*t)) {
        return Vec::new();
    }

    let names: Vec<&str> = allowed_types.iter().map(|t| t.as_str()).collect();
    vec![Diagnostic::error("wrong type")
        .with_detail(format!("oid type must be {}", names.join(", ")))
        .with_attribute(attribute)]
}

/// Check that `value` is a duration string such as `90s` or `1h30m`.
pub fn validate_duration(value: &str, attribute: &str) -> Vec<Diagnostic> {
    match parse_duration(value) {
        Ok(_) => Vec::new(),
        Err(e) => vec![Diagnostic::error("Invalid field")
            .with_detail(e.message().to_string())
            .with_attribute(attribute)],
    }
}

/// Apply a string validator to every value of a map attribute.
///
/// Each entry is validated under the path `<attribute>.<key>`. Values that
/// are not strings are reported without calling `validator`.
pub fn validate_map_values<F>(
    map: &serde_json::Map<String, Value>,
    attribute: &str,
    validator: F,
) -> Vec<Diagnostic>
where
    F: Fn(&str, &str) -> Vec<Diagnostic>,
{
    let mut diagnostics = Vec::new();
    for (key, value) in map {
        let path = format!("{}.{}", attribute, key);
        match value.as_str() {
            Some(s) => diagnostics.extend(validator(s, &path)),
            None => diagnostics.push(type_error(&path, "string", value)),
        }
    }
    diagnostics
}

/// Whether saving a dataset is expected to produce a new version.
///
/// True when any input OID is pinned to a version newer than the dataset's
/// own. Versions compare as text, which orders the backend's timestamp
/// versions correctly. Unparseable OIDs never force a recompute.
pub fn dataset_needs_recompute<'a, I>(dataset_oid: &str, inputs: I) -> bool
where
    I: IntoIterator<Item = &'a str>,
{
    let Some(current) = dataset_oid.parse::<Oid>().ok().and_then(|oid| oid.version) else {
        return false;
    };

    inputs
        .into_iter()
        .filter_map(|input| input.parse::<Oid>().ok())
        .filter_map(|oid| oid.version)
        .any(|version| version > current)
}

/// Whether two duration strings denote the same duration, e.g. `60s` and `1m`.
///
/// Strings that fail to parse compare as zero.
pub fn durations_equivalent(old: &str, new: &str) -> bool {
    parse_duration(old).unwrap_or_default() == parse_duration(new).unwrap_or_default()
}

// Helper functions

fn value_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn type_error(path: &str, expected: &str, got: &Value) -> Diagnostic {
    Diagnostic::error(format!("Invalid type for attribute '{}'", path))
        .with_detail(format!("Expected {}, got {}", expected, value_type_name(got)))
        .with_attribute(path)
}
