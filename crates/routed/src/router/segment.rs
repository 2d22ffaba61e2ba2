//! Route pattern parsing.
//!
//! Pattern syntax:
//!
//! - `/users/list` — literal segments
//! - `/users/{id:int}` — typed parameter (`{id}` defaults to `string`)
//! - `/posts/{slug?}` — optional trailing parameter
//! - `/files/{*path}` — wildcard capturing the remainder, final only

use crate::router::RouteError;

/// One compiled path segment.
#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    Literal(String),
    Typed {
        name: String,
        type_id: String,
        optional: bool,
    },
    Wildcard(String),
}

impl Segment {
    pub fn param_name(&self) -> Option<&str> {
        match self {
            Self::Literal(_) => None,
            Self::Typed { name, .. } => Some(name),
            Self::Wildcard(name) => Some(name),
        }
    }

    pub fn is_optional(&self) -> bool {
        matches!(self, Self::Typed { optional: true, .. })
    }
}

fn valid_param_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn invalid(pattern: &str) -> RouteError {
    RouteError::InvalidPattern {
        pattern: pattern.to_string(),
    }
}

/// Parses a route pattern into segments, validating structure:
/// at most one wildcard and only as the final segment; optional segments
/// only in the trailing run; unique parameter names.
pub fn parse_pattern(pattern: &str) -> Result<Vec<Segment>, RouteError> {
    if !pattern.starts_with('/') {
        return Err(invalid(pattern));
    }

    let mut segments = Vec::new();
    let mut names: Vec<String> = Vec::new();
    for raw in pattern[1..].split('/') {
        if raw.is_empty() {
            // Collapsed or trailing slash inside a pattern is malformed;
            // a bare "/" produces zero segments and is fine.
            if pattern == "/" {
                break;
            }
            return Err(invalid(pattern));
        }

        if let Some(inner) = raw.strip_prefix('{').and_then(|r| r.strip_suffix('}')) {
            if let Some(name) = inner.strip_prefix('*') {
                if !valid_param_name(name) {
                    return Err(invalid(pattern));
                }
                names.push(name.to_string());
                segments.push(Segment::Wildcard(name.to_string()));
                continue;
            }

            let (body, optional) = match inner.strip_suffix('?') {
                Some(body) => (body, true),
                None => (inner, false),
            };
            let (name, type_id) = match body.split_once(':') {
                Some((name, type_id)) => (name, type_id),
                None => (body, "string"),
            };
            if !valid_param_name(name) || type_id.is_empty() {
                return Err(invalid(pattern));
            }
            names.push(name.to_string());
            segments.push(Segment::Typed {
                name: name.to_string(),
                type_id: type_id.to_string(),
                optional,
            });
        } else {
            if raw.contains('{') || raw.contains('}') {
                return Err(invalid(pattern));
            }
            segments.push(Segment::Literal(raw.to_string()));
        }
    }

    // Structural checks: wildcard final, optionals trailing, names unique.
    let mut seen_optional = false;
    for (index, segment) in segments.iter().enumerate() {
        match segment {
            Segment::Wildcard(_) => {
                if index + 1 != segments.len() || seen_optional {
                    return Err(RouteError::WildcardPosition {
                        pattern: pattern.to_string(),
                    });
                }
            }
            Segment::Typed { optional: true, .. } => seen_optional = true,
            _ if seen_optional => {
                return Err(invalid(pattern));
            }
            _ => {}
        }
    }
    let mut deduped = names.clone();
    deduped.sort();
    deduped.dedup();
    if deduped.len() != names.len() {
        return Err(invalid(pattern));
    }

    Ok(segments)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literals_and_typed_segments() {
        let segments = parse_pattern("/users/{id:int}/posts").unwrap();
        assert_eq!(
            segments,
            vec![
                Segment::Literal("users".into()),
                Segment::Typed {
                    name: "id".into(),
                    type_id: "int".into(),
                    optional: false
                },
                Segment::Literal("posts".into()),
            ]
        );
    }

    #[test]
    fn bare_param_defaults_to_string_type() {
        let segments = parse_pattern("/users/{id}").unwrap();
        assert_eq!(
            segments[1],
            Segment::Typed {
                name: "id".into(),
                type_id: "string".into(),
                optional: false
            }
        );
    }

    #[test]
    fn optional_and_wildcard_markers() {
        let segments = parse_pattern("/posts/{slug:slug?}").unwrap();
        assert!(segments[1].is_optional());

        let segments = parse_pattern("/files/{*path}").unwrap();
        assert_eq!(segments[1], Segment::Wildcard("path".into()));
    }

    #[test]
    fn root_pattern_is_empty() {
        assert!(parse_pattern("/").unwrap().is_empty());
    }

    #[test]
    fn malformed_patterns_are_rejected() {
        for pattern in [
            "users",           // missing leading slash
            "/users/{id",      // unclosed brace
            "/users/{}",       // empty name
            "/users/{user id}",// invalid name
            "/a//b",           // empty segment
            "/files/{*p}/more",// wildcard not final
            "/a/{x?}/b",       // optional not trailing
            "/a/{x}/{x}",      // duplicate names
        ] {
            assert!(parse_pattern(pattern).is_err(), "accepted {:?}", pattern);
        }
    }
}
