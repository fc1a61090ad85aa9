//! Typed, validated access to the named inputs of one tool call.
//!
//! A [`ParamSet`] is built once from the caller's JSON object and shared
//! read-only with every layer of the call. Handlers declare at each call site
//! whether a parameter is required or optional; coercion failures and
//! unsupported enumerated values are always reported as
//! [`ToolError::Validation`], never silently replaced by a default.

use std::sync::Arc;

use serde_json::{Map, Value};

use crate::error::ToolError;

/// Immutable set of named call parameters.
#[derive(Debug, Clone, Default)]
pub struct ParamSet {
    values: Arc<Map<String, Value>>,
}

impl From<Map<String, Value>> for ParamSet {
    fn from(values: Map<String, Value>) -> Self {
        Self {
            values: Arc::new(values),
        }
    }
}

impl ParamSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from an arbitrary JSON value, which must be an object (or null).
    pub fn from_value(value: Value) -> Result<Self, ToolError> {
        match value {
            Value::Object(map) => Ok(Self::from(map)),
            Value::Null => Ok(Self::new()),
            other => Err(ToolError::Validation(format!(
                "parameters must be a JSON object, got {}",
                type_name(&other)
            ))),
        }
    }

    /// Raw value as supplied, without any absence handling.
    pub fn raw(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// Parameter names in the order they are stored.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// True if the parameter is present and not blank.
    pub fn is_present(&self, name: &str) -> bool {
        self.present(name).is_some()
    }

    /// The value if it counts as present: not null, and for strings not
    /// empty or whitespace-only.
    fn present(&self, name: &str) -> Option<&Value> {
        match self.values.get(name)? {
            Value::Null => None,
            Value::String(s) if s.trim().is_empty() => None,
            v => Some(v),
        }
    }

    /// Read a required parameter.
    pub fn required<T: FromParam>(&self, name: &str) -> Result<T, ToolError> {
        let value = self.present(name).ok_or_else(|| ToolError::missing(name))?;
        coerce(name, value)
    }

    /// Read an optional parameter, falling back to `default` when absent.
    pub fn optional<T: FromParam>(&self, name: &str, default: T) -> Result<T, ToolError> {
        Ok(self.maybe(name)?.unwrap_or(default))
    }

    /// Read an optional parameter without a default.
    pub fn maybe<T: FromParam>(&self, name: &str) -> Result<Option<T>, ToolError> {
        match self.present(name) {
            Some(value) => coerce(name, value).map(Some),
            None => Ok(None),
        }
    }

    /// Read a required enumerated parameter, matched case-insensitively.
    /// Returns the canonical spelling from `choices`.
    pub fn required_choice(
        &self,
        name: &str,
        choices: &[&'static str],
    ) -> Result<&'static str, ToolError> {
        let raw: String = self.required(name)?;
        match_choice(name, &raw, choices)
    }

    /// Read an optional enumerated parameter.
    pub fn optional_choice(
        &self,
        name: &str,
        choices: &[&'static str],
        default: &'static str,
    ) -> Result<&'static str, ToolError> {
        match self.maybe::<String>(name)? {
            Some(raw) => match_choice(name, &raw, choices),
            None => Ok(default),
        }
    }
}

fn match_choice(
    name: &str,
    raw: &str,
    choices: &[&'static str],
) -> Result<&'static str, ToolError> {
    let wanted = raw.trim();
    choices
        .iter()
        .copied()
        .find(|c| c.eq_ignore_ascii_case(wanted))
        .ok_or_else(|| {
            ToolError::invalid(
                name,
                format!("'{wanted}'"),
                &format!("one of: {}", choices.join(", ")),
            )
        })
}

fn coerce<T: FromParam>(name: &str, value: &Value) -> Result<T, ToolError> {
    T::from_param(value).ok_or_else(|| ToolError::invalid(name, describe(value), T::EXPECTED))
}

/// Short rendering of a supplied value for error messages.
fn describe(value: &Value) -> String {
    let text = match value {
        Value::String(s) => format!("'{s}'"),
        other => other.to_string(),
    };
    if text.chars().count() > 64 {
        let head: String = text.chars().take(61).collect();
        format!("{head}...")
    } else {
        text
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Conversion from a present JSON value into a typed parameter.
///
/// Returning `None` means the value has the wrong shape; the accessor turns
/// that into a validation error quoting [`FromParam::EXPECTED`].
pub trait FromParam: Sized {
    /// Human description of the accepted shape.
    const EXPECTED: &'static str;

    fn from_param(value: &Value) -> Option<Self>;
}

impl FromParam for String {
    const EXPECTED: &'static str = "a string";

    fn from_param(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }
}

impl FromParam for bool {
    const EXPECTED: &'static str = "a boolean";

    fn from_param(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(b) => Some(*b),
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "yes" | "1" => Some(true),
                "false" | "no" | "0" => Some(false),
                _ => None,
            },
            Value::Number(n) => match n.as_i64() {
                Some(1) => Some(true),
                Some(0) => Some(false),
                _ => None,
            },
            _ => None,
        }
    }
}

impl FromParam for i64 {
    const EXPECTED: &'static str = "an integer";

    fn from_param(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_i64().or_else(|| {
                n.as_f64()
                    .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
                    .map(|f| f as i64)
            }),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

impl FromParam for usize {
    const EXPECTED: &'static str = "a non-negative integer";

    fn from_param(value: &Value) -> Option<Self> {
        i64::from_param(value).and_then(|n| usize::try_from(n).ok())
    }
}

impl FromParam for u32 {
    const EXPECTED: &'static str = "a non-negative integer";

    fn from_param(value: &Value) -> Option<Self> {
        i64::from_param(value).and_then(|n| u32::try_from(n).ok())
    }
}

impl FromParam for f64 {
    const EXPECTED: &'static str = "a number";

    fn from_param(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
            _ => None,
        }
    }
}

/// Structured node. JSON text is parsed; any other value is taken as is.
impl FromParam for Value {
    const EXPECTED: &'static str = "a JSON value";

    fn from_param(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => serde_json::from_str(s).ok(),
            other => Some(other.clone()),
        }
    }
}

/// List of values: a JSON array, or JSON array text.
impl FromParam for Vec<Value> {
    const EXPECTED: &'static str = "a list";

    fn from_param(value: &Value) -> Option<Self> {
        match value {
            Value::Array(items) => Some(items.clone()),
            Value::String(s) => match serde_json::from_str(s).ok()? {
                Value::Array(items) => Some(items),
                _ => None,
            },
            _ => None,
        }
    }
}

/// List of strings: an array of scalars, JSON array text, or a
/// comma-separated string.
impl FromParam for Vec<String> {
    const EXPECTED: &'static str = "a list of strings";

    fn from_param(value: &Value) -> Option<Self> {
        match value {
            Value::Array(items) => items.iter().map(String::from_param).collect(),
            Value::String(s) if s.trim_start().starts_with('[') => {
                let items: Vec<Value> = serde_json::from_str(s).ok()?;
                items.iter().map(String::from_param).collect()
            }
            Value::String(s) => Some(
                s.split(',')
                    .map(str::trim)
                    .filter(|part| !part.is_empty())
                    .map(str::to_owned)
                    .collect(),
            ),
            _ => None,
        }
    }
}
