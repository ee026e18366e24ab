use serde_json::Value;
use thiserror::Error;

/// Category of a request-option fault. All kinds are caller faults and never retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseErrorKind {
    InvalidJson,
    TypeMismatch,
    MissingRequired,
    InvalidEnum,
    InvalidUnit,
}

impl ParseErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ParseErrorKind::InvalidJson => "invalid_json",
            ParseErrorKind::TypeMismatch => "type_mismatch",
            ParseErrorKind::MissingRequired => "missing_required",
            ParseErrorKind::InvalidEnum => "invalid_enum",
            ParseErrorKind::InvalidUnit => "invalid_unit",
        }
    }
}

/// A request option could not be turned into a conversion parameter.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{}", describe(.kind, .key, .value))]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub key: String,
    pub value: Option<Value>,
}

impl ParseError {
    pub fn invalid_json() -> Self {
        Self {
            kind: ParseErrorKind::InvalidJson,
            key: String::new(),
            value: None,
        }
    }

    pub fn type_mismatch(key: impl Into<String>, value: &Value) -> Self {
        Self::with_value(ParseErrorKind::TypeMismatch, key, value.clone())
    }

    pub fn missing(key: impl Into<String>) -> Self {
        Self {
            kind: ParseErrorKind::MissingRequired,
            key: key.into(),
            value: None,
        }
    }

    pub fn invalid_enum(key: impl Into<String>, value: &Value) -> Self {
        Self::with_value(ParseErrorKind::InvalidEnum, key, value.clone())
    }

    pub fn invalid_unit(key: impl Into<String>, value: &Value) -> Self {
        Self::with_value(ParseErrorKind::InvalidUnit, key, value.clone())
    }

    fn with_value(kind: ParseErrorKind, key: impl Into<String>, value: Value) -> Self {
        Self {
            kind,
            key: key.into(),
            value: Some(value),
        }
    }
}

fn describe(kind: &ParseErrorKind, key: &str, value: &Option<Value>) -> String {
    match (kind, value) {
        (ParseErrorKind::InvalidJson, _) => "the json request is malformed".to_string(),
        (ParseErrorKind::MissingRequired, _) => format!("missing required param \"{key}\""),
        (_, Some(value)) => format!("could not parse param \"{key}\" ({value})"),
        (_, None) => format!("could not parse param \"{key}\""),
    }
}
