use ahash::HashMap as AHashMap;
use once_cell::sync::Lazy;

/// Canonical display casing for well-known header names.
///
/// Internally all names are lowercase; this list restores conventional
/// casing when a response is emitted over a byte-oriented transport. It
/// covers the same names as the bridge token table.
static EMIT_CASE: Lazy<AHashMap<&'static str, &'static str>> = Lazy::new(|| {
    let mut map = AHashMap::default();
    for (lower, display) in [
        ("host", "Host"),
        ("connection", "Connection"),
        ("user-agent", "User-Agent"),
        ("accept", "Accept"),
        ("accept-encoding", "Accept-Encoding"),
        ("accept-language", "Accept-Language"),
        ("content-type", "Content-Type"),
        ("content-length", "Content-Length"),
        ("transfer-encoding", "Transfer-Encoding"),
        ("cookie", "Cookie"),
        ("set-cookie", "Set-Cookie"),
        ("cache-control", "Cache-Control"),
        ("pragma", "Pragma"),
        ("upgrade", "Upgrade"),
        ("authorization", "Authorization"),
        ("origin", "Origin"),
        ("referer", "Referer"),
        ("location", "Location"),
        ("server", "Server"),
        ("date", "Date"),
        ("x-forwarded-for", "X-Forwarded-For"),
        ("x-forwarded-proto", "X-Forwarded-Proto"),
        ("x-forwarded-host", "X-Forwarded-Host"),
        ("x-forwarded-port", "X-Forwarded-Port"),
        ("x-request-id", "X-Request-Id"),
        ("sec-websocket-key", "Sec-WebSocket-Key"),
        ("sec-websocket-accept", "Sec-WebSocket-Accept"),
        ("sec-websocket-version", "Sec-WebSocket-Version"),
        ("sec-websocket-protocol", "Sec-WebSocket-Protocol"),
        ("sec-websocket-extensions", "Sec-WebSocket-Extensions"),
    ] {
        map.insert(lower, display);
    }
    map
});

/// An ordered multimap of HTTP headers with lowercase-canonical names.
///
/// Insertion order is preserved so repeated headers (`Set-Cookie`) round-trip
/// through the bridge protocol byte-for-byte. Lookups are linear; header
/// counts are small enough that a map would cost more than it saves.
#[derive(Debug, Clone, Default)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a header map from `(name, value)` pairs, lowercasing names.
    pub fn from_pairs<I, N, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (N, V)>,
        N: AsRef<str>,
        V: Into<String>,
    {
        let mut headers = Self::new();
        for (name, value) in pairs {
            headers.append(name.as_ref(), value);
        }
        headers
    }

    /// First value for `name`, if any.
    pub fn get(&self, name: &str) -> Option<&str> {
        let name = name.to_ascii_lowercase();
        self.entries
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v.as_str())
    }

    /// All values for `name`, in insertion order.
    pub fn get_all(&self, name: &str) -> Vec<&str> {
        let name = name.to_ascii_lowercase();
        self.entries
            .iter()
            .filter(|(n, _)| *n == name)
            .map(|(_, v)| v.as_str())
            .collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Replaces all values of `name` with a single value.
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        let name = name.to_ascii_lowercase();
        self.entries.retain(|(n, _)| *n != name);
        self.entries.push((name, value.into()));
    }

    /// Appends a value without touching existing ones.
    pub fn append(&mut self, name: &str, value: impl Into<String>) {
        self.entries.push((name.to_ascii_lowercase(), value.into()));
    }

    /// Removes every value of `name`; returns true if anything was removed.
    pub fn remove(&mut self, name: &str) -> bool {
        let name = name.to_ascii_lowercase();
        let before = self.entries.len();
        self.entries.retain(|(n, _)| *n != name);
        self.entries.len() != before
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates `(lowercase-name, value)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Conventional display casing for a lowercase header name.
    ///
    /// Well-known names come from the fixed table; everything else is
    /// title-cased on dash boundaries (`x-custom-tag` → `X-Custom-Tag`).
    pub fn display_name(name: &str) -> String {
        if let Some(display) = EMIT_CASE.get(name) {
            return (*display).to_string();
        }
        name.split('-')
            .map(|part| {
                let mut chars = part.chars();
                match chars.next() {
                    Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                    None => String::new(),
                }
            })
            .collect::<Vec<_>>()
            .join("-")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_lowercased_on_insert() {
        let mut headers = Headers::new();
        headers.set("Content-Type", "application/json");
        assert_eq!(headers.get("content-type"), Some("application/json"));
        assert_eq!(headers.get("CONTENT-TYPE"), Some("application/json"));
    }

    #[test]
    fn append_preserves_duplicates_in_order() {
        let mut headers = Headers::new();
        headers.append("set-cookie", "a=1");
        headers.append("set-cookie", "b=2");
        assert_eq!(headers.get_all("set-cookie"), vec!["a=1", "b=2"]);
    }

    #[test]
    fn set_replaces_all_values() {
        let mut headers = Headers::new();
        headers.append("accept", "text/html");
        headers.append("accept", "application/json");
        headers.set("accept", "*/*");
        assert_eq!(headers.get_all("accept"), vec!["*/*"]);
    }

    #[test]
    fn display_name_uses_well_known_casing() {
        assert_eq!(Headers::display_name("sec-websocket-key"), "Sec-WebSocket-Key");
        assert_eq!(Headers::display_name("content-type"), "Content-Type");
        assert_eq!(Headers::display_name("x-made-up"), "X-Made-Up");
    }
}
