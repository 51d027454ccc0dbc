//! Typed parameters.
//!
//! Manual-dispatch inputs and per-job `with:` options share one model: a
//! declared [`ParamSpec`] per name and a validated [`ParamValue`] per name.

use crate::{Error, Result};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ParamType {
    Boolean,
    String,
    Number,
    Choice,
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ParamType::Boolean => "boolean",
            ParamType::String => "string",
            ParamType::Number => "number",
            ParamType::Choice => "choice",
        };
        f.write_str(s)
    }
}

/// Declaration of a single named parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ParamSpec {
    #[serde(rename = "type")]
    pub kind: ParamType,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub default: Option<serde_json::Value>,
    /// Allowed values for `choice` parameters.
    #[serde(default)]
    pub options: Vec<String>,
}

/// A validated parameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Number(f64),
    String(String),
}

impl ParamValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ParamValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParamValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::String(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Bool(b) => write!(f, "{b}"),
            ParamValue::Number(n) => write!(f, "{n}"),
            ParamValue::String(s) => f.write_str(s),
        }
    }
}

impl ParamSpec {
    fn new(kind: ParamType) -> Self {
        Self {
            kind,
            description: None,
            required: false,
            default: None,
            options: vec![],
        }
    }

    pub fn boolean(default: bool) -> Self {
        Self {
            default: Some(serde_json::Value::Bool(default)),
            ..Self::new(ParamType::Boolean)
        }
    }

    pub fn number(default: f64) -> Self {
        Self {
            default: Some(serde_json::json!(default)),
            ..Self::new(ParamType::Number)
        }
    }

    /// Optional string with no default.
    pub fn string() -> Self {
        Self::new(ParamType::String)
    }

    pub fn choice(options: &[&str], default: &str) -> Self {
        Self {
            default: Some(serde_json::Value::String(default.to_string())),
            options: options.iter().map(|o| o.to_string()).collect(),
            ..Self::new(ParamType::Choice)
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Check a raw value against this declaration.
    ///
    /// Booleans and numbers also accept their string spellings (`"true"`,
    /// `"300"`), since dispatch forms deliver everything as text.
    pub fn coerce(&self, name: &str, raw: &serde_json::Value) -> Result<ParamValue> {
        use serde_json::Value;

        let invalid = || Error::InvalidInput {
            name: name.to_string(),
            expected: self.expected(),
            actual: raw.to_string(),
        };

        match (self.kind, raw) {
            (ParamType::Boolean, Value::Bool(b)) => Ok(ParamValue::Bool(*b)),
            (ParamType::Boolean, Value::String(s)) => match s.trim().to_ascii_lowercase().as_str()
            {
                "true" => Ok(ParamValue::Bool(true)),
                "false" => Ok(ParamValue::Bool(false)),
                _ => Err(invalid()),
            },
            (ParamType::Number, Value::Number(n)) => {
                n.as_f64().map(ParamValue::Number).ok_or_else(invalid)
            }
            (ParamType::Number, Value::String(s)) => s
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|n| n.is_finite())
                .map(ParamValue::Number)
                .ok_or_else(invalid),
            (ParamType::String, Value::String(s)) => Ok(ParamValue::String(s.clone())),
            (ParamType::Choice, Value::String(s)) if self.options.iter().any(|o| o == s) => {
                Ok(ParamValue::String(s.clone()))
            }
            _ => Err(invalid()),
        }
    }

    fn expected(&self) -> String {
        match self.kind {
            ParamType::Choice => format!("one of [{}]", self.options.join(", ")),
            kind => kind.to_string(),
        }
    }

    /// Check that a declared default (if any) satisfies the declared type.
    pub fn validate_default(&self, name: &str) -> Result<()> {
        if self.kind == ParamType::Choice && self.options.is_empty() {
            return Err(Error::InvalidWorkflow(format!(
                "choice parameter {name} declares no options"
            )));
        }
        if let Some(default) = &self.default {
            self.coerce(name, default)?;
        }
        Ok(())
    }
}

/// Validated parameters keyed by name.
pub type ParamValues = BTreeMap<String, ParamValue>;

/// Validate provided values against declarations and fill in defaults.
///
/// `scope` prefixes parameter names in errors (for example a job id); pass
/// an empty string for top-level inputs.
pub fn resolve_params(
    specs: &BTreeMap<String, ParamSpec>,
    provided: &BTreeMap<String, serde_json::Value>,
    scope: &str,
) -> Result<ParamValues> {
    let qualify = |name: &str| {
        if scope.is_empty() {
            name.to_string()
        } else {
            format!("{scope}.{name}")
        }
    };

    if let Some(unknown) = provided.keys().find(|k| !specs.contains_key(*k)) {
        return Err(Error::UnknownInput(qualify(unknown)));
    }

    let mut values = ParamValues::new();
    for (name, spec) in specs {
        let raw = provided.get(name).or(spec.default.as_ref());
        match raw {
            Some(raw) => {
                values.insert(name.clone(), spec.coerce(&qualify(name), raw)?);
            }
            None if spec.required => return Err(Error::MissingInput(qualify(name))),
            None => {}
        }
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn dispatch_inputs() -> BTreeMap<String, ParamSpec> {
        BTreeMap::from([
            ("dry-run".to_string(), ParamSpec::boolean(false)),
            ("fuzz-seconds".to_string(), ParamSpec::number(600.0)),
            (
                "sanitizer".to_string(),
                ParamSpec::choice(&["address", "undefined", "memory"], "address"),
            ),
            ("release-tag".to_string(), ParamSpec::string().required()),
        ])
    }

    #[test]
    fn test_defaults_fill_missing_values() {
        let provided = BTreeMap::from([("release-tag".to_string(), json!("v1.2.0"))]);
        let values = resolve_params(&dispatch_inputs(), &provided, "").unwrap();

        assert_eq!(values["dry-run"], ParamValue::Bool(false));
        assert_eq!(values["fuzz-seconds"], ParamValue::Number(600.0));
        assert_eq!(values["sanitizer"].as_str(), Some("address"));
    }

    #[test]
    fn test_string_forms_are_coerced() {
        let provided = BTreeMap::from([
            ("release-tag".to_string(), json!("v1")),
            ("dry-run".to_string(), json!("TRUE")),
            ("fuzz-seconds".to_string(), json!("300")),
        ]);
        let values = resolve_params(&dispatch_inputs(), &provided, "").unwrap();
        assert_eq!(values["dry-run"].as_bool(), Some(true));
        assert_eq!(values["fuzz-seconds"].as_f64(), Some(300.0));
    }

    #[test]
    fn test_invalid_type_is_rejected() {
        let provided = BTreeMap::from([
            ("release-tag".to_string(), json!("v1")),
            ("fuzz-seconds".to_string(), json!("ten minutes")),
        ]);
        let err = resolve_params(&dispatch_inputs(), &provided, "").unwrap_err();
        assert!(matches!(err, Error::InvalidInput { ref name, .. } if name == "fuzz-seconds"));
    }

    #[test]
    fn test_choice_outside_options_is_rejected() {
        let provided = BTreeMap::from([
            ("release-tag".to_string(), json!("v1")),
            ("sanitizer".to_string(), json!("thread")),
        ]);
        assert!(resolve_params(&dispatch_inputs(), &provided, "").is_err());
    }

    #[test]
    fn test_unknown_and_missing_inputs() {
        let provided = BTreeMap::from([("verbose".to_string(), json!(true))]);
        let err = resolve_params(&dispatch_inputs(), &provided, "fuzz").unwrap_err();
        assert!(matches!(err, Error::UnknownInput(ref n) if n == "fuzz.verbose"));

        let err = resolve_params(&dispatch_inputs(), &BTreeMap::new(), "").unwrap_err();
        assert!(matches!(err, Error::MissingInput(ref n) if n == "release-tag"));
    }

    #[test]
    fn test_default_must_match_type() {
        let mut spec = ParamSpec::boolean(true);
        spec.default = Some(json!("sometimes"));
        assert!(spec.validate_default("dry-run").is_err());
        assert!(ParamSpec::number(80.0).validate_default("threshold").is_ok());
    }
}
