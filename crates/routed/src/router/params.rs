//! Parameter type registry.
//!
//! Typed route segments (`{id:int}`) are matched by a named regex and cast
//! into a [`ParamValue`] by the type's cast function. Registries are
//! engine-scoped; a process-wide default exists as a convenience for hosts
//! that register custom types before building engines.

use crate::models::param::ParamValue;
use crate::router::RouteError;
use ahash::HashMap as AHashMap;
use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::{Arc, RwLock};

/// Cast failure; treated as a non-match so resolution falls through to the
/// next route candidate.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("parameter cast failed")]
pub struct CastError;

pub type CastFn = Arc<dyn Fn(&str) -> Result<ParamValue, CastError> + Send + Sync>;

/// A named segment pattern with its cast function.
#[derive(Clone)]
pub struct ParamType {
    pub name: String,
    pub pattern: String,
    regex: Regex,
    cast: CastFn,
}

impl ParamType {
    fn new(name: &str, pattern: &str, cast: CastFn) -> Result<Self, RouteError> {
        // Segment regexes are always anchored to the full segment.
        let anchored = format!("^(?:{})$", pattern);
        let regex = Regex::new(&anchored).map_err(|source| RouteError::ParamTypeRegex {
            name: name.to_string(),
            source,
        })?;
        Ok(Self {
            name: name.to_string(),
            pattern: pattern.to_string(),
            regex,
            cast,
        })
    }

    pub fn matches(&self, segment: &str) -> bool {
        self.regex.is_match(segment)
    }

    /// Casts matched text; `None` (absent optional) yields
    /// [`ParamValue::Absent`].
    pub fn cast(&self, text: Option<&str>) -> Result<ParamValue, CastError> {
        match text {
            Some(text) => (self.cast)(text),
            None => Ok(ParamValue::Absent),
        }
    }

}

impl std::fmt::Debug for ParamType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParamType")
            .field("name", &self.name)
            .field("pattern", &self.pattern)
            .finish()
    }
}

/// Engine-scoped registry of parameter types.
pub struct ParamTypes {
    types: RwLock<AHashMap<String, Arc<ParamType>>>,
}

impl ParamTypes {
    /// Empty registry with no types at all.
    pub fn empty() -> Self {
        Self {
            types: RwLock::new(AHashMap::default()),
        }
    }

    /// Registry preloaded with the builtin types.
    pub fn with_builtins() -> Self {
        let registry = Self::empty();
        registry.install_builtins();
        registry
    }

    fn install_builtins(&self) {
        let str_cast: CastFn = Arc::new(|s| Ok(ParamValue::Str(s.to_string())));

        let builtins: Vec<(&str, &str, CastFn)> = vec![
            (
                "int",
                r"\d+",
                Arc::new(|s| s.parse().map(ParamValue::Int).map_err(|_| CastError)),
            ),
            (
                "double",
                r"-?\d+(\.\d+)?",
                Arc::new(|s| s.parse().map(ParamValue::Float).map_err(|_| CastError)),
            ),
            ("string", r"[^/]+", str_cast.clone()),
            (
                "uuid",
                r"[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}",
                str_cast.clone(),
            ),
            ("slug", r"[a-z0-9-]+", str_cast.clone()),
            ("email", r"[^@\s/]+@[^@\s/]+\.[^@\s/]+", str_cast.clone()),
            ("url", r"https?://\S+", str_cast.clone()),
            (
                "ip",
                r"[0-9a-fA-F:.]+",
                Arc::new(|s| {
                    s.parse::<std::net::IpAddr>()
                        .map(|_| ParamValue::Str(s.to_string()))
                        .map_err(|_| CastError)
                }),
            ),
            (
                "date",
                r"\d{4}-\d{2}-\d{2}",
                Arc::new(|s| {
                    NaiveDate::parse_from_str(s, "%Y-%m-%d")
                        .map(ParamValue::Date)
                        .map_err(|_| CastError)
                }),
            ),
        ];

        for (name, pattern, cast) in builtins {
            self.register(name, pattern, cast)
                .expect("builtin parameter type regex");
        }
    }

    /// Registers (or replaces) a parameter type.
    pub fn register(&self, name: &str, pattern: &str, cast: CastFn) -> Result<(), RouteError> {
        let param_type = ParamType::new(name, pattern, cast)?;
        self.types
            .write()
            .expect("param type registry poisoned")
            .insert(name.to_string(), Arc::new(param_type));
        Ok(())
    }

    pub fn unregister(&self, name: &str) -> bool {
        self.types
            .write()
            .expect("param type registry poisoned")
            .remove(name)
            .is_some()
    }

    pub fn get(&self, name: &str) -> Option<Arc<ParamType>> {
        self.types
            .read()
            .expect("param type registry poisoned")
            .get(name)
            .cloned()
    }
}

impl Default for ParamTypes {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl std::fmt::Debug for ParamTypes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<String> = self
            .types
            .read()
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default();
        f.debug_struct("ParamTypes").field("types", &names).finish()
    }
}

static DEFAULT_REGISTRY: Lazy<ParamTypes> = Lazy::new(ParamTypes::with_builtins);

/// Process-default registry; a convenience wrapper over an engine-scoped
/// instance shared by engines built without an explicit registry.
pub fn default_registry() -> &'static ParamTypes {
    &DEFAULT_REGISTRY
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_matches_and_casts() {
        let types = ParamTypes::with_builtins();
        let int = types.get("int").unwrap();
        assert!(int.matches("42"));
        assert!(!int.matches("abc"));
        assert!(!int.matches("4/2"));
        assert_eq!(int.cast(Some("42")).unwrap(), ParamValue::Int(42));
    }

    #[test]
    fn date_casts_to_calendar_value() {
        let types = ParamTypes::with_builtins();
        let date = types.get("date").unwrap();
        assert!(date.matches("2024-03-15"));
        let value = date.cast(Some("2024-03-15")).unwrap();
        assert_eq!(
            value.as_date(),
            Some(NaiveDate::from_ymd_opt(2024, 3, 15).unwrap())
        );
        // Shape matches but the calendar rejects it.
        assert_eq!(date.cast(Some("2024-13-99")), Err(CastError));
    }

    #[test]
    fn ip_cast_validates_addresses() {
        let types = ParamTypes::with_builtins();
        let ip = types.get("ip").unwrap();
        assert!(ip.cast(Some("192.168.0.1")).is_ok());
        assert!(ip.cast(Some("::1")).is_ok());
        assert_eq!(ip.cast(Some("999.1.1.1")), Err(CastError));
    }

    #[test]
    fn absent_optional_casts_to_absent_marker() {
        let types = ParamTypes::with_builtins();
        let slug = types.get("slug").unwrap();
        assert_eq!(slug.cast(None).unwrap(), ParamValue::Absent);
    }

    #[test]
    fn custom_types_can_be_registered_and_removed() {
        let types = ParamTypes::with_builtins();
        types
            .register(
                "hexid",
                r"[0-9a-f]{8}",
                Arc::new(|s| Ok(ParamValue::Str(s.to_string()))),
            )
            .unwrap();
        assert!(types.get("hexid").unwrap().matches("deadbeef"));
        assert!(types.unregister("hexid"));
        assert!(types.get("hexid").is_none());
    }

    #[test]
    fn invalid_custom_regex_is_a_registration_error() {
        let types = ParamTypes::with_builtins();
        let result = types.register(
            "broken",
            r"[unclosed",
            Arc::new(|s| Ok(ParamValue::Str(s.to_string()))),
        );
        assert!(matches!(result, Err(RouteError::ParamTypeRegex { .. })));
    }
}
