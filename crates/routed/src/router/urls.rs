//! Reverse URL generation from the name → template index.

use crate::router::segment::Segment;
use crate::router::{RouteError, RouteRecord};
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};

/// Characters escaped inside a path segment; everything a segment can
/// legally carry (`-`, `.`, `~`, `_`, ...) passes through untouched.
const SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// Characters escaped in query names and values.
const QUERY: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'&')
    .add(b'+')
    .add(b'=');

/// Builds a URL for `route` by substituting `params` into its compiled
/// segments. Parameters the template does not consume are appended as a
/// query string; absent optional parameters truncate the tail.
pub(crate) fn generate(
    route: &RouteRecord,
    params: &[(&str, &str)],
) -> Result<String, RouteError> {
    let lookup = |name: &str| params.iter().find(|(n, _)| *n == name).map(|(_, v)| *v);
    let route_name = route
        .name
        .clone()
        .unwrap_or_else(|| route.pattern.clone());

    let mut used: Vec<&str> = Vec::new();
    let mut path = String::new();
    for segment in &route.segments {
        match segment {
            Segment::Literal(text) => {
                path.push('/');
                path.push_str(text);
            }
            Segment::Typed { name, optional, .. } => match lookup(name) {
                Some(value) => {
                    used.push(name);
                    path.push('/');
                    path.push_str(&utf8_percent_encode(value, SEGMENT).to_string());
                }
                None if *optional => break,
                None => {
                    return Err(RouteError::MissingParam {
                        name: route_name,
                        param: name.clone(),
                    })
                }
            },
            Segment::Wildcard(name) => match lookup(name) {
                Some(value) => {
                    used.push(name);
                    // Wildcards span segments; slashes pass through.
                    path.push('/');
                    path.push_str(value);
                }
                None => {
                    return Err(RouteError::MissingParam {
                        name: route_name,
                        param: name.clone(),
                    })
                }
            },
        }
    }
    if path.is_empty() {
        path.push('/');
    }

    let mut query = String::new();
    for (name, value) in params {
        if used.contains(name) {
            continue;
        }
        query.push(if query.is_empty() { '?' } else { '&' });
        query.push_str(&utf8_percent_encode(name, QUERY).to_string());
        query.push('=');
        query.push_str(&utf8_percent_encode(value, QUERY).to_string());
    }

    Ok(format!("{}{}", path, query))
}
