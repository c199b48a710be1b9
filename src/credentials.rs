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

//! Credentials and the strategies that produce them.
//!
//! [Credentials] is the object a
//! [ClientFactory][crate::provider::ClientFactory] attaches to the client it
//! builds: an opaque handle that yields bearer tokens and request headers on
//! demand. The submodules implement one credential strategy each; which one
//! backs a given [Credentials] is decided by
//! [AuthMethod][crate::config::AuthMethod].

use crate::Result;
use crate::config::{AuthMethod, ClientConfig};
use crate::errors::{AuthError, ConfigError, Error};
use crate::token::Token;
use http::header::{HeaderName, HeaderValue};
use std::path::Path;
use std::sync::Arc;

pub(crate) mod application_default;
pub mod compute_engine;
pub(crate) mod jws;
pub mod private_key;
pub mod service_account;
pub mod user_account;

pub mod dynamic {
    //! Dyn-compatible traits for implementors of custom credentials.

    use super::{HeaderName, HeaderValue, Result, Token};

    /// A dyn-compatible version of `Credentials`.
    #[async_trait::async_trait]
    pub trait CredentialsProvider: std::fmt::Debug + Send + Sync {
        /// Asynchronously retrieves a token.
        ///
        /// Returns a cached token if one is held and still valid, otherwise
        /// obtains a fresh one. What "obtains" means depends on the
        /// strategy: a network exchange, a locally signed JWT, or a
        /// metadata-service call.
        async fn get_token(&self) -> Result<Token>;

        /// Asynchronously constructs the auth headers for a request.
        async fn get_headers(&self) -> Result<Vec<(HeaderName, HeaderValue)>>;
    }
}

/// An opaque source of bearer tokens and auth headers.
///
/// Obtained from one of the strategy builders, or handed to a
/// [ClientFactory][crate::provider::ClientFactory] by the provider. Cloning
/// is cheap and clones share the underlying token cache.
#[derive(Clone, Debug)]
pub struct Credentials {
    pub(crate) inner: Arc<dyn dynamic::CredentialsProvider>,
}

impl<T> From<T> for Credentials
where
    T: dynamic::CredentialsProvider + 'static,
{
    fn from(provider: T) -> Self {
        Self {
            inner: Arc::new(provider),
        }
    }
}

impl Credentials {
    /// Returns a bearer token, fetching or refreshing one if needed.
    pub async fn get_token(&self) -> Result<Token> {
        self.inner.get_token().await
    }

    /// Returns the auth headers for a request.
    pub async fn get_headers(&self) -> Result<Vec<(HeaderName, HeaderValue)>> {
        self.inner.get_headers().await
    }
}

/// Builds [Credentials] for the configured authentication method.
///
/// Dispatches over [AuthMethod]. Local key material is read here, so a
/// missing or unreadable keyfile fails fast, but no network I/O happens:
/// every strategy defers its token exchange to first token use.
pub(crate) fn build_credentials(
    config: &ClientConfig,
    scope: &str,
) -> std::result::Result<Credentials, Error> {
    match &config.auth_method {
        AuthMethod::PrivateKey => {
            let p12_keyfile = config
                .p12_keyfile
                .as_ref()
                .ok_or_else(|| ConfigError::missing_field("p12_keyfile"))?;
            let service_account_email = config
                .service_account_email
                .as_deref()
                .ok_or_else(|| ConfigError::missing_field("service_account_email"))?;
            let credentials = private_key::Builder::new(p12_keyfile, service_account_email)
                .with_scope(scope)
                .build()?;
            Ok(credentials)
        }
        AuthMethod::ComputeEngine => Ok(compute_engine::Builder::default()
            .with_scope(scope)
            .build()),
        AuthMethod::JsonKey => {
            let json_keyfile = config
                .json_keyfile
                .as_deref()
                .ok_or_else(|| ConfigError::missing_field("json_keyfile"))?;
            // The field holds either a path to a key file or the key
            // itself.
            let contents = if Path::new(json_keyfile).exists() {
                std::fs::read_to_string(json_keyfile).map_err(AuthError::non_retryable)?
            } else {
                json_keyfile.to_string()
            };
            let js = serde_json::from_str(&contents).map_err(AuthError::non_retryable)?;
            Ok(service_account::creds_from(js, scope)?)
        }
        AuthMethod::ApplicationDefault => Ok(application_default::build(scope)?),
        AuthMethod::Other(method) => Err(ConfigError::unknown_method(method.as_str()).into()),
    }
}
