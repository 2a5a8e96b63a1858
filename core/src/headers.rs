//! Translation between `Headers` and the engine's header representation.
//!
//! Outbound translation is lossy: native engines accept one value per name,
//! so when a name repeats the last value wins. Inbound translation keeps
//! every instance the engine reports.

use crate::engine::NativeCall;
use crate::http::Headers;

/// Headers that describe the body rather than the message, and so also
/// belong to the body's own header scope.
const CONTENT_HEADERS: &[&str] = &[
    "allow",
    "content-disposition",
    "content-encoding",
    "content-language",
    "content-length",
    "content-location",
    "content-md5",
    "content-range",
    "content-type",
    "expires",
    "last-modified",
];

pub fn is_content_header(name: &str) -> bool {
    CONTENT_HEADERS.iter().any(|h| h.eq_ignore_ascii_case(name))
}

/// Collapse one or more header scopes into single-valued native headers.
///
/// Scopes are applied in order, so a later scope overrides an earlier one.
/// Each name is emitted at the position it first appeared, spelled the way
/// its winning entry spelled it.
pub fn to_native<'a>(scopes: impl IntoIterator<Item = &'a Headers>) -> Vec<(String, String)> {
    let mut out: Vec<(String, String)> = Vec::new();
    for (name, value) in scopes.into_iter().flat_map(|h| h.iter()) {
        match out.iter_mut().find(|(k, _)| k.eq_ignore_ascii_case(name)) {
            Some(slot) => *slot = (name.to_string(), value.to_string()),
            None => out.push((name.to_string(), value.to_string())),
        }
    }
    out
}

/// Hand translated headers to a native call.
pub fn apply(native: &[(String, String)], call: &mut dyn NativeCall) {
    for (name, value) in native {
        call.set_header(name, value);
    }
}

/// Split native response headers into the response scope (everything) and
/// the body scope (content-describing headers only).
///
/// Entries with an empty name, which some engines use for the status line,
/// are skipped. Values are passed through untouched.
pub fn from_native(native: Vec<(String, String)>) -> (Headers, Headers) {
    let mut message = Headers::new();
    let mut content = Headers::new();
    for (name, value) in native {
        if name.trim().is_empty() {
            continue;
        }
        if is_content_header(&name) {
            content.append(name.clone(), value.clone());
        }
        message.append(name, value);
    }
    (message, content)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&str, &str)]) -> Headers {
        pairs.iter().map(|(k, v)| (*k, *v)).collect()
    }

    #[test]
    fn to_native_last_value_wins_for_repeated_names() {
        let h = headers(&[("Accept", "text/html"), ("X-Tag", "1"), ("accept", "application/json")]);
        let native = to_native([&h]);
        assert_eq!(
            native,
            vec![
                ("accept".to_string(), "application/json".to_string()),
                ("X-Tag".to_string(), "1".to_string()),
            ]
        );
    }

    #[test]
    fn to_native_later_scope_overrides_earlier() {
        let request = headers(&[("Content-Type", "text/plain"), ("User-Agent", "nh")]);
        let body = headers(&[("Content-Type", "application/json"), ("Content-Length", "2")]);
        let native = to_native([&request, &body]);
        assert_eq!(native.len(), 3);
        assert_eq!(native[0], ("Content-Type".to_string(), "application/json".to_string()));
        assert_eq!(native[2], ("Content-Length".to_string(), "2".to_string()));
    }

    #[test]
    fn from_native_keeps_every_instance_and_scopes_content_headers() {
        let native = vec![
            (String::new(), "HTTP/1.1 200 OK".to_string()),
            ("Set-Cookie".to_string(), "a=1".to_string()),
            ("Set-Cookie".to_string(), "b=2".to_string()),
            ("Content-Type".to_string(), "text/plain".to_string()),
            ("X-Odd".to_string(), "\u{1}not;parseable".to_string()),
        ];
        let (message, content) = from_native(native);

        assert_eq!(message.len(), 4);
        assert_eq!(message.get_all("set-cookie").collect::<Vec<_>>(), vec!["a=1", "b=2"]);
        assert_eq!(message.get("x-odd"), Some("\u{1}not;parseable"));
        assert_eq!(content.len(), 1);
        assert_eq!(content.get("content-type"), Some("text/plain"));
    }

    #[test]
    fn response_direction_roundtrip_is_lossless_request_direction_is_not() {
        let h = headers(&[("X-Multi", "1"), ("X-Multi", "2"), ("Vary", "Accept")]);

        // What the engine would report back if it echoed each instance.
        let echoed: Vec<(String, String)> = h.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        let (back, _) = from_native(echoed);
        assert_eq!(back, h);

        // Outbound collapses duplicates; the first X-Multi value is dropped.
        let (collapsed, _) = from_native(to_native([&h]));
        assert_ne!(collapsed, h);
        assert_eq!(collapsed.get_all("x-multi").collect::<Vec<_>>(), vec!["2"]);
    }

    #[test]
    fn content_header_check_ignores_case() {
        assert!(is_content_header("CONTENT-TYPE"));
        assert!(is_content_header("Last-Modified"));
        assert!(!is_content_header("Cache-Control"));
    }
}
