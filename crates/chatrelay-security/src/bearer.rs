use std::fmt;

/// A bearer credential taken from an `Authorization` header.
///
/// `Debug` never prints the token.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct BearerToken(String);

impl BearerToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Parse an `Authorization` header value. Returns `None` for other schemes
    /// or an empty token.
    pub fn from_header(value: &str) -> Option<Self> {
        let (scheme, token) = value.trim().split_once(' ')?;
        if !scheme.eq_ignore_ascii_case("bearer") {
            return None;
        }
        let token = token.trim();
        if token.is_empty() {
            return None;
        }
        Some(Self(token.to_string()))
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Header value to forward downstream.
    pub fn header_value(&self) -> String {
        format!("Bearer {}", self.0)
    }
}

impl fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BearerToken([REDACTED])")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bearer_scheme_case_insensitively() {
        let token = BearerToken::from_header("bearer abc.def").unwrap();
        assert_eq!(token.expose(), "abc.def");
        assert_eq!(token.header_value(), "Bearer abc.def");
    }

    #[test]
    fn rejects_other_schemes_and_empty_tokens() {
        assert!(BearerToken::from_header("Basic dXNlcjpwYXNz").is_none());
        assert!(BearerToken::from_header("Bearer   ").is_none());
        assert!(BearerToken::from_header("token").is_none());
    }

    #[test]
    fn debug_hides_token() {
        let token = BearerToken::new("secret");
        assert!(!format!("{token:?}").contains("secret"));
    }
}
