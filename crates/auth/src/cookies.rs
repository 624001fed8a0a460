//! Inbound `Cookie` header parsing.

/// A single request cookie (name and percent-decoded value).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestCookie {
    pub name: String,
    pub value: String,
}

impl RequestCookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Parse a `Cookie` request header into name/value pairs.
///
/// Pairs without `=` or with an empty name are skipped. Values that are not
/// valid percent-encoding are kept verbatim.
pub fn parse_cookie_header(header: &str) -> Vec<RequestCookie> {
    header
        .split(';')
        .filter_map(|pair| {
            let (name, value) = pair.trim().split_once('=')?;
            let name = name.trim();
            if name.is_empty() {
                return None;
            }
            let value = value.trim().trim_matches('"');
            let value = urlencoding::decode(value)
                .map(|v| v.into_owned())
                .unwrap_or_else(|_| value.to_string());
            Some(RequestCookie::new(name, value))
        })
        .collect()
}

/// Only the cookies whose name starts with the provider session prefix.
///
/// Nothing else from the header is ever handed to the provider client.
pub fn session_cookies(header: Option<&str>, prefix: &str) -> Vec<RequestCookie> {
    let Some(header) = header else {
        return Vec::new();
    };
    if prefix.is_empty() {
        return Vec::new();
    }
    parse_cookie_header(header)
        .into_iter()
        .filter(|c| c.name.starts_with(prefix))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_decodes() {
        let cookies = parse_cookie_header("a=1; b=hello%20world;c=\"quoted\"");
        assert_eq!(
            cookies,
            vec![
                RequestCookie::new("a", "1"),
                RequestCookie::new("b", "hello world"),
                RequestCookie::new("c", "quoted"),
            ]
        );
    }

    #[test]
    fn skips_malformed_pairs() {
        let cookies = parse_cookie_header("novalue; =orphan; ok=1;;");
        assert_eq!(cookies, vec![RequestCookie::new("ok", "1")]);
    }

    #[test]
    fn values_may_contain_equals() {
        let cookies = parse_cookie_header("sb-x-auth-token=base64-eyJhIjoxfQ==");
        assert_eq!(cookies[0].value, "base64-eyJhIjoxfQ==");
    }

    #[test]
    fn filters_to_provider_prefix() {
        let header = "theme=dark; sb-abc-auth-token=tok; analytics=1; sb-abc-auth-token.1=more";
        let cookies = session_cookies(Some(header), "sb-");
        let names: Vec<_> = cookies.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["sb-abc-auth-token", "sb-abc-auth-token.1"]);
    }

    #[test]
    fn no_header_or_no_match_is_empty() {
        assert!(session_cookies(None, "sb-").is_empty());
        assert!(session_cookies(Some("foo=bar; hello=world"), "sb-").is_empty());
        assert!(session_cookies(Some("sb-a=1"), "").is_empty());
    }
}
