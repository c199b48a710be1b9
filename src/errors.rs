// Copyright 2025 The bqsink Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The errors returned while acquiring authenticated clients.

use http::StatusCode;
use std::sync::Arc;

/// The error type returned by
/// [`get_client`][crate::provider::ClientProvider::get_client].
///
/// Client acquisition fails in one of two ways: the configuration selected
/// something the dispatcher does not support, or the selected strategy could
/// not produce usable credentials. Callers that want to distinguish the two
/// can match on the variants or use the predicates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The configured authentication method is unsupported, or a field the
    /// selected method requires was absent.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The credential material was missing, malformed, or rejected.
    #[error(transparent)]
    Auth(#[from] AuthError),
}

impl Error {
    /// Returns `true` if the error originates in the configuration.
    ///
    /// Configuration errors are never retryable: the same configuration
    /// produces the same error on every attempt.
    pub fn is_config(&self) -> bool {
        matches!(self, Error::Config(_))
    }

    /// Returns `true` if the error originates in credential acquisition.
    pub fn is_auth(&self) -> bool {
        matches!(self, Error::Auth(_))
    }

    /// Returns `true` if another attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Config(_) => false,
            Error::Auth(e) => e.is_retryable(),
        }
    }
}

/// An error dispatching on the configured authentication method.
#[derive(thiserror::Error, Debug)]
#[error(transparent)]
pub struct ConfigError(ConfigErrorKind);

impl ConfigError {
    /// The configured authentication method is not one of the supported
    /// strategies.
    pub fn is_unknown_method(&self) -> bool {
        matches!(self.0, ConfigErrorKind::UnknownMethod(_))
    }

    /// A field required by the selected strategy was absent from the
    /// configuration.
    pub fn is_missing_field(&self) -> bool {
        matches!(self.0, ConfigErrorKind::MissingField(_))
    }

    pub(crate) fn unknown_method<T: Into<String>>(method: T) -> Self {
        Self(ConfigErrorKind::UnknownMethod(method.into()))
    }

    pub(crate) fn missing_field(field: &'static str) -> Self {
        Self(ConfigErrorKind::MissingField(field))
    }
}

#[derive(thiserror::Error, Debug)]
enum ConfigErrorKind {
    #[error("unknown auth method: {0}")]
    UnknownMethod(String),
    #[error("missing required field: {0}")]
    MissingField(&'static str),
}

/// An error acquiring credentials or the tokens they produce.
///
/// Carries a retryability flag so callers know whether another attempt is
/// worthwhile. Errors raised while reading or parsing local key material are
/// not retryable. Errors raised while exchanging tokens over the network are
/// retryable when the failure was transient.
#[derive(Clone, Debug)]
pub struct AuthError {
    is_retryable: bool,
    source: AuthErrorImpl,
}

impl AuthError {
    /// Creates a new error caused by `source`.
    pub(crate) fn new<T: std::error::Error + Send + Sync + 'static>(
        is_retryable: bool,
        source: T,
    ) -> Self {
        AuthError {
            is_retryable,
            source: AuthErrorImpl::Source(Arc::new(source)),
        }
    }

    /// Creates a new error with the given message.
    pub fn from_str<T: Into<String>>(is_retryable: bool, message: T) -> Self {
        AuthError::new(is_retryable, AuthErrorImpl::SimpleMessage(message.into()))
    }

    /// Returns `true` if another attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        self.is_retryable
    }

    pub(crate) fn retryable<T: std::error::Error + Send + Sync + 'static>(source: T) -> Self {
        AuthError::new(true, source)
    }

    pub(crate) fn retryable_from_str<T: Into<String>>(message: T) -> Self {
        AuthError::from_str(true, message)
    }

    pub(crate) fn non_retryable<T: std::error::Error + Send + Sync + 'static>(source: T) -> Self {
        AuthError::new(false, source)
    }

    pub(crate) fn non_retryable_from_str<T: Into<String>>(message: T) -> Self {
        AuthError::from_str(false, message)
    }
}

#[derive(Clone, Debug)]
enum AuthErrorImpl {
    SimpleMessage(String),
    Source(Arc<dyn std::error::Error + Send + Sync>),
}

impl std::error::Error for AuthErrorImpl {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AuthErrorImpl::SimpleMessage(_) => None,
            AuthErrorImpl::Source(source) => Some(source),
        }
    }
}

impl std::fmt::Display for AuthErrorImpl {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            AuthErrorImpl::SimpleMessage(message) => write!(f, "{message}"),
            AuthErrorImpl::Source(source) => write!(f, "{source}"),
        }
    }
}

impl std::error::Error for AuthError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.source()
    }
}

const RETRYABLE_MSG: &str = "but future attempts may succeed";
const NON_RETRYABLE_MSG: &str = "and future attempts will not succeed";

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let msg = if self.is_retryable {
            RETRYABLE_MSG
        } else {
            NON_RETRYABLE_MSG
        };
        write!(f, "cannot acquire credentials, {msg}, source:{}", self.source)
    }
}

/// Classifies an HTTP status from a token endpoint.
///
/// Internal server errors do not indicate that there is anything wrong with
/// our request, so we retry them.
pub(crate) fn is_retryable(c: StatusCode) -> bool {
    match c {
        StatusCode::INTERNAL_SERVER_ERROR
        | StatusCode::SERVICE_UNAVAILABLE
        | StatusCode::REQUEST_TIMEOUT
        | StatusCode::TOO_MANY_REQUESTS => true,
        _ => false,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use test_case::test_case;

    #[test_case(StatusCode::INTERNAL_SERVER_ERROR; "internal server error")]
    #[test_case(StatusCode::SERVICE_UNAVAILABLE; "service unavailable")]
    #[test_case(StatusCode::REQUEST_TIMEOUT; "request timeout")]
    #[test_case(StatusCode::TOO_MANY_REQUESTS; "too many requests")]
    fn retryable(c: StatusCode) {
        assert!(is_retryable(c));
    }

    #[test_case(StatusCode::NOT_FOUND; "not found")]
    #[test_case(StatusCode::UNAUTHORIZED; "unauthorized")]
    #[test_case(StatusCode::BAD_REQUEST; "bad request")]
    #[test_case(StatusCode::BAD_GATEWAY; "bad gateway")]
    #[test_case(StatusCode::PRECONDITION_FAILED; "precondition failed")]
    fn non_retryable(c: StatusCode) {
        assert!(!is_retryable(c));
    }

    #[test_case(true, RETRYABLE_MSG)]
    #[test_case(false, NON_RETRYABLE_MSG)]
    fn auth_error_fmt(is_retryable: bool, msg: &str) {
        let e = AuthError::from_str(is_retryable, "test-only-err-123");
        let got = format!("{e}");
        assert!(got.contains("test-only-err-123"), "{got}");
        assert!(got.contains(msg), "{got}");
    }

    #[test]
    fn auth_error_source() {
        use std::error::Error as _;
        let e = AuthError::from_str(true, "test-only-err-123");
        let source = e.source().map(ToString::to_string);
        assert_eq!(source.as_deref(), Some("test-only-err-123"));

        let wrapped = std::io::Error::other("test-only-err-456");
        let e = AuthError::non_retryable(wrapped);
        assert!(!e.is_retryable());
        let source = e.source().map(ToString::to_string);
        assert_eq!(source.as_deref(), Some("test-only-err-456"));
    }

    #[test]
    fn config_error_constructors() {
        let e = ConfigError::unknown_method("oauth");
        assert!(e.is_unknown_method(), "{e:?}");
        assert!(!e.is_missing_field(), "{e:?}");
        assert_eq!(e.to_string(), "unknown auth method: oauth");

        let e = ConfigError::missing_field("p12_keyfile");
        assert!(e.is_missing_field(), "{e:?}");
        assert!(!e.is_unknown_method(), "{e:?}");
        assert_eq!(e.to_string(), "missing required field: p12_keyfile");
    }

    #[test]
    fn error_predicates() {
        let e = Error::from(ConfigError::unknown_method("oauth"));
        assert!(e.is_config(), "{e:?}");
        assert!(!e.is_auth(), "{e:?}");
        assert!(!e.is_retryable(), "{e:?}");

        let e = Error::from(AuthError::retryable_from_str("try again"));
        assert!(e.is_auth(), "{e:?}");
        assert!(!e.is_config(), "{e:?}");
        assert!(e.is_retryable(), "{e:?}");

        let e = Error::from(AuthError::non_retryable_from_str("give up"));
        assert!(e.is_auth(), "{e:?}");
        assert!(!e.is_retryable(), "{e:?}");
    }
}
