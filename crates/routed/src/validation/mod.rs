//! Field validation rules for request payloads.
//!
//! Routes declare rules as pipe-separated strings (`"required|int|min:3"`);
//! the injected validation middleware parses the request body and runs them,
//! failing the request with a 422 error bag on the first offending fields.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email regex"));
static URL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^https?://[^\s/$.?#].[^\s]*$").expect("url regex"));

/// A single validation rule applied to one field.
#[derive(Debug, Clone)]
pub enum Rule {
    Required,
    Int,
    Double,
    Email,
    Url,
    /// Minimum string length / numeric value.
    Min(i64),
    /// Maximum string length / numeric value.
    Max(i64),
    /// Exact string length.
    Len(usize),
    /// Value must be one of the listed options.
    In(Vec<String>),
    /// Value must match the pattern.
    Pattern(Regex),
}

/// Parse error for a rule string.
#[derive(Debug, thiserror::Error, PartialEq)]
#[error("invalid validation rule: {0}")]
pub struct RuleParseError(pub String);

impl Rule {
    /// Parses a single rule token such as `min:3` or `in:a,b,c`.
    pub fn parse(token: &str) -> Result<Self, RuleParseError> {
        let (name, arg) = match token.split_once(':') {
            Some((name, arg)) => (name, Some(arg)),
            None => (token, None),
        };
        let arg_num = |arg: Option<&str>| {
            arg.and_then(|a| a.parse::<i64>().ok())
                .ok_or_else(|| RuleParseError(token.to_string()))
        };
        match name {
            "required" => Ok(Self::Required),
            "int" => Ok(Self::Int),
            "double" => Ok(Self::Double),
            "email" => Ok(Self::Email),
            "url" => Ok(Self::Url),
            "min" => arg_num(arg).map(Self::Min),
            "max" => arg_num(arg).map(Self::Max),
            "len" => arg_num(arg).map(|n| Self::Len(n as usize)),
            "in" => {
                let options = arg
                    .ok_or_else(|| RuleParseError(token.to_string()))?
                    .split(',')
                    .map(str::to_string)
                    .collect::<Vec<_>>();
                Ok(Self::In(options))
            }
            "regex" => {
                let pattern = arg.ok_or_else(|| RuleParseError(token.to_string()))?;
                Regex::new(pattern)
                    .map(Self::Pattern)
                    .map_err(|_| RuleParseError(token.to_string()))
            }
            _ => Err(RuleParseError(token.to_string())),
        }
    }

    fn check(&self, field: &str, value: Option<&Value>) -> Option<String> {
        let present = value.map(|v| !v.is_null()).unwrap_or(false);
        match self {
            Self::Required => {
                let empty_string = value
                    .and_then(Value::as_str)
                    .map(|s| s.is_empty())
                    .unwrap_or(false);
                if !present || empty_string {
                    return Some(format!("{} is required", field));
                }
                None
            }
            // All other rules pass on absent values; pair with `required`
            // to reject absence.
            _ if !present => None,
            Self::Int => match value {
                Some(Value::Number(n)) if n.is_i64() || n.is_u64() => None,
                Some(Value::String(s)) if s.parse::<i64>().is_ok() => None,
                _ => Some(format!("{} must be an integer", field)),
            },
            Self::Double => match value {
                Some(Value::Number(_)) => None,
                Some(Value::String(s)) if s.parse::<f64>().is_ok() => None,
                _ => Some(format!("{} must be a number", field)),
            },
            Self::Email => match value.and_then(Value::as_str) {
                Some(s) if EMAIL_RE.is_match(s) => None,
                _ => Some(format!("{} must be a valid email address", field)),
            },
            Self::Url => match value.and_then(Value::as_str) {
                Some(s) if URL_RE.is_match(s) => None,
                _ => Some(format!("{} must be a valid url", field)),
            },
            Self::Min(min) => match value {
                Some(Value::String(s)) if (s.chars().count() as i64) < *min => {
                    Some(format!("{} must be at least {} characters", field, min))
                }
                Some(Value::Number(n)) if n.as_f64().unwrap_or(0.0) < *min as f64 => {
                    Some(format!("{} must be at least {}", field, min))
                }
                _ => None,
            },
            Self::Max(max) => match value {
                Some(Value::String(s)) if (s.chars().count() as i64) > *max => {
                    Some(format!("{} must be at most {} characters", field, max))
                }
                Some(Value::Number(n)) if n.as_f64().unwrap_or(0.0) > *max as f64 => {
                    Some(format!("{} must be at most {}", field, max))
                }
                _ => None,
            },
            Self::Len(len) => match value.and_then(Value::as_str) {
                Some(s) if s.chars().count() != *len => {
                    Some(format!("{} must be exactly {} characters", field, len))
                }
                _ => None,
            },
            Self::In(options) => {
                let text = match value {
                    Some(Value::String(s)) => s.clone(),
                    Some(Value::Number(n)) => n.to_string(),
                    _ => return Some(format!("{} must be one of: {}", field, options.join(", "))),
                };
                if options.iter().any(|o| *o == text) {
                    None
                } else {
                    Some(format!("{} must be one of: {}", field, options.join(", ")))
                }
            }
            Self::Pattern(regex) => match value.and_then(Value::as_str) {
                Some(s) if regex.is_match(s) => None,
                _ => Some(format!("{} has an invalid format", field)),
            },
        }
    }
}

/// Rules for a set of fields, in declaration order.
#[derive(Debug, Clone, Default)]
pub struct Rules {
    fields: Vec<(String, Vec<Rule>)>,
}

impl Rules {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a pipe-separated rule string for `field`.
    pub fn field(mut self, field: &str, rules: &str) -> Result<Self, RuleParseError> {
        let parsed = rules
            .split('|')
            .filter(|token| !token.is_empty())
            .map(Rule::parse)
            .collect::<Result<Vec<_>, _>>()?;
        self.fields.push((field.to_string(), parsed));
        Ok(self)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Validates `data`, returning every failing field with its messages.
    pub fn validate(&self, data: &serde_json::Map<String, Value>) -> Result<(), ValidationErrors> {
        let mut errors: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (field, rules) in &self.fields {
            let value = data.get(field);
            for rule in rules {
                if let Some(message) = rule.check(field, value) {
                    errors.entry(field.clone()).or_default().push(message);
                }
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationErrors { errors })
        }
    }
}

/// Field → failure messages, ordered by field name.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationErrors {
    errors: BTreeMap<String, Vec<String>>,
}

impl ValidationErrors {
    pub fn as_map(&self) -> &BTreeMap<String, Vec<String>> {
        &self.errors
    }

    pub fn field(&self, name: &str) -> Option<&[String]> {
        self.errors.get(name).map(Vec::as_slice)
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fields: Vec<&str> = self.errors.keys().map(String::as_str).collect();
        write!(f, "validation failed for: {}", fields.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn data(value: Value) -> serde_json::Map<String, Value> {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn required_rejects_absent_and_empty() {
        let rules = Rules::new().field("name", "required").unwrap();
        assert!(rules.validate(&data(json!({}))).is_err());
        assert!(rules.validate(&data(json!({"name": ""}))).is_err());
        assert!(rules.validate(&data(json!({"name": "ok"}))).is_ok());
    }

    #[test]
    fn optional_rules_pass_on_absent_fields() {
        let rules = Rules::new().field("age", "int|min:18").unwrap();
        assert!(rules.validate(&data(json!({}))).is_ok());
        assert!(rules.validate(&data(json!({"age": 17}))).is_err());
        assert!(rules.validate(&data(json!({"age": 21}))).is_ok());
        assert!(rules.validate(&data(json!({"age": "nope"}))).is_err());
    }

    #[test]
    fn error_bag_collects_all_messages() {
        let rules = Rules::new()
            .field("email", "required|email")
            .unwrap()
            .field("role", "in:admin,user")
            .unwrap();
        let err = rules
            .validate(&data(json!({"email": "not-an-email", "role": "guest"})))
            .unwrap_err();
        assert_eq!(err.field("email").unwrap().len(), 1);
        assert!(err.field("role").unwrap()[0].contains("admin, user"));
    }

    #[test]
    fn unknown_rule_fails_to_parse() {
        assert!(Rules::new().field("x", "bogus").is_err());
    }
}
