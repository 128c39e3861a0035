//! Basic-to-Bearer credential translation.
//!
//! Clients authenticate against the proxy with HTTP Basic credentials built
//! from an Asana personal access token split at its `:`. The upstream API
//! wants the token back as `Bearer 1/<user>:<password>`.
//!
//! Translation is fail-open: any value that cannot be translated is
//! forwarded untouched and the failure is only logged.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use http::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use regex::Regex;
use thiserror::Error;
use tracing::{debug, error};

use crate::error::ProxyResult;

/// Reasons a credential could not be translated.
#[derive(Debug, Error)]
pub enum AuthError {
    /// The header does not use the Basic scheme.
    #[error("authorization header is not a Basic credential")]
    NotBasic,

    /// The Basic payload is not valid base64.
    #[error("error decoding authorization header value: {0}")]
    Decode(#[from] base64::DecodeError),

    /// The decoded payload is not UTF-8 text.
    #[error("authorization header value is not valid UTF-8")]
    NotUtf8,

    /// The decoded payload has no `user:password` separator.
    #[error("authorization header value has no ':' separator")]
    MissingSeparator,

    /// The translated value cannot be sent as a header.
    #[error("translated authorization value is not a valid header: {0}")]
    InvalidHeader(#[from] http::header::InvalidHeaderValue),
}

/// What happened to the `Authorization` header of one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthOutcome {
    /// No `Authorization` header was present.
    Absent,
    /// The header was rewritten to the Bearer form.
    Translated,
    /// The header was forwarded unchanged.
    PassedThrough,
}

impl AuthOutcome {
    /// Short name for metric labels.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Absent => "absent",
            Self::Translated => "translated",
            Self::PassedThrough => "passed_through",
        }
    }
}

/// Converts Basic credentials into upstream Bearer tokens.
#[derive(Debug, Clone)]
pub struct AuthTranslator {
    basic: Regex,
}

impl AuthTranslator {
    /// Create a translator.
    ///
    /// Fails only if the built-in pattern does not compile.
    pub fn new() -> ProxyResult<Self> {
        Ok(Self {
            basic: Regex::new(r"^Basic\s+(.*)$")?,
        })
    }

    /// Translate a raw `Authorization` value into its Bearer form.
    pub fn translate(&self, value: &str) -> Result<String, AuthError> {
        let token = self
            .basic
            .captures(value)
            .and_then(|caps| caps.get(1))
            .ok_or(AuthError::NotBasic)?
            .as_str()
            .trim();

        let decoded = STANDARD.decode(token)?;
        let decoded = String::from_utf8(decoded).map_err(|_| AuthError::NotUtf8)?;
        let (username, password) = decoded.split_once(':').ok_or(AuthError::MissingSeparator)?;

        Ok(format!("Bearer 1/{username}:{password}"))
    }

    /// Rewrite the `Authorization` header of an outbound header map in place.
    ///
    /// Only the first `Authorization` value is considered. On failure the
    /// header map is left exactly as it was.
    pub fn rewrite_headers(&self, headers: &mut HeaderMap) -> AuthOutcome {
        let Some(original) = headers.get(AUTHORIZATION) else {
            return AuthOutcome::Absent;
        };

        let translated = original
            .to_str()
            .map_err(|_| AuthError::NotUtf8)
            .and_then(|value| self.translate(value))
            .and_then(|bearer| HeaderValue::from_str(&bearer).map_err(AuthError::from));

        match translated {
            Ok(mut bearer) => {
                bearer.set_sensitive(true);
                headers.insert(AUTHORIZATION, bearer);
                debug!("authorization translated to bearer token");
                AuthOutcome::Translated
            }
            Err(AuthError::NotBasic) => AuthOutcome::PassedThrough,
            Err(e) => {
                error!(error = %e, "authorization passed through untranslated");
                AuthOutcome::PassedThrough
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn basic(credentials: &str) -> String {
        format!("Basic {}", STANDARD.encode(credentials))
    }

    #[test]
    fn test_translate_basic() {
        let auth = AuthTranslator::new().unwrap();
        assert_eq!(
            auth.translate(&basic("alice:secret")).unwrap(),
            "Bearer 1/alice:secret"
        );
    }

    #[test]
    fn test_translate_keeps_colons_in_password() {
        let auth = AuthTranslator::new().unwrap();
        assert_eq!(
            auth.translate(&basic("1200:abc:def")).unwrap(),
            "Bearer 1/1200:abc:def"
        );
    }

    #[test]
    fn test_translate_failures() {
        let auth = AuthTranslator::new().unwrap();
        assert!(matches!(
            auth.translate("Bearer abc"),
            Err(AuthError::NotBasic)
        ));
        assert!(matches!(
            auth.translate("Basic !!!not-base64"),
            Err(AuthError::Decode(_))
        ));
        assert!(matches!(
            auth.translate(&basic("no-separator")),
            Err(AuthError::MissingSeparator)
        ));
        assert!(matches!(
            auth.translate(&format!("Basic {}", STANDARD.encode([0xff, 0xfe, b':']))),
            Err(AuthError::NotUtf8)
        ));
    }

    #[test]
    fn test_rewrite_headers_translates() {
        let auth = AuthTranslator::new().unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, basic("alice:secret").parse().unwrap());
        headers.insert("accept", HeaderValue::from_static("application/json"));

        assert_eq!(auth.rewrite_headers(&mut headers), AuthOutcome::Translated);
        assert_eq!(headers[AUTHORIZATION], "Bearer 1/alice:secret");
        assert_eq!(headers["accept"], "application/json");
    }

    #[test]
    fn test_rewrite_headers_fail_open() {
        let auth = AuthTranslator::new().unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic ###"));

        assert_eq!(auth.rewrite_headers(&mut headers), AuthOutcome::PassedThrough);
        assert_eq!(headers[AUTHORIZATION], "Basic ###");
    }

    #[test]
    fn test_rewrite_headers_absent_and_other_schemes() {
        let auth = AuthTranslator::new().unwrap();
        let mut headers = HeaderMap::new();
        assert_eq!(auth.rewrite_headers(&mut headers), AuthOutcome::Absent);
        assert!(headers.is_empty());

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer 1/tok"));
        assert_eq!(auth.rewrite_headers(&mut headers), AuthOutcome::PassedThrough);
        assert_eq!(headers[AUTHORIZATION], "Bearer 1/tok");
    }

    proptest! {
        #[test]
        fn prop_basic_credentials_become_bearer(
            user in "[A-Za-z0-9_.-]{1,16}",
            pass in "[A-Za-z0-9_.:-]{0,32}",
        ) {
            let auth = AuthTranslator::new().unwrap();
            let bearer = auth.translate(&basic(&format!("{user}:{pass}"))).unwrap();
            prop_assert_eq!(bearer, format!("Bearer 1/{user}:{pass}"));
        }

        #[test]
        fn prop_non_basic_values_pass_through(value in "[A-Za-z0-9 ]{0,24}") {
            prop_assume!(!value.starts_with("Basic"));
            let auth = AuthTranslator::new().unwrap();
            let mut headers = HeaderMap::new();
            headers.insert(AUTHORIZATION, HeaderValue::from_str(&value).unwrap());
            auth.rewrite_headers(&mut headers);
            prop_assert_eq!(headers[AUTHORIZATION].to_str().unwrap(), value.as_str());
        }
    }
}
