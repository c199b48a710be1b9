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

//! [Credentials] for a user, obtained through the application default
//! credentials discovery chain.
//!
//! `gcloud auth application-default login` leaves behind an
//! `authorized_user` JSON file holding an OAuth2 refresh token. These
//! credentials exchange that refresh token at the OAuth2 endpoint for
//! short-lived access tokens, on first use and again whenever the cached
//! token expires.

use crate::Result;
use crate::credentials::Credentials;
use crate::credentials::dynamic::CredentialsProvider;
use crate::errors::{AuthError, is_retryable};
use crate::headers_util::build_bearer_headers;
use crate::token::{Token, TokenProvider};
use crate::token_cache::TokenCache;
use http::header::{CONTENT_TYPE, HeaderName, HeaderValue};
use reqwest::{Client, Method};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

const OAUTH2_ENDPOINT: &str = "https://oauth2.googleapis.com/token";

/// Builds [Credentials] from a parsed `authorized_user` file.
pub(crate) fn creds_from(js: serde_json::Value, scope: &str) -> Result<Credentials> {
    Builder::new(js).with_scope(scope).build()
}

/// A builder for user account [Credentials].
pub struct Builder {
    authorized_user: serde_json::Value,
    scope: Option<String>,
    token_uri: Option<String>,
}

impl Builder {
    /// Creates a builder from the JSON contents of an `authorized_user`
    /// file.
    pub fn new(authorized_user: serde_json::Value) -> Self {
        Self {
            authorized_user,
            scope: None,
            token_uri: None,
        }
    }

    /// Sets the scope requested with each access token.
    pub fn with_scope<S: Into<String>>(mut self, scope: S) -> Self {
        self.scope = Some(scope.into());
        self
    }

    /// Overrides the token endpoint, primarily for testing.
    pub fn with_token_uri<S: Into<String>>(mut self, token_uri: S) -> Self {
        self.token_uri = Some(token_uri.into());
        self
    }

    /// Returns [Credentials] that exchange the refresh token for access
    /// tokens.
    ///
    /// # Errors
    ///
    /// Fails if the JSON is not a well-formed `authorized_user` file.
    pub fn build(self) -> Result<Credentials> {
        let authorized_user = serde_json::from_value::<AuthorizedUser>(self.authorized_user)
            .map_err(AuthError::non_retryable)?;
        if authorized_user.cred_type != "authorized_user" {
            return Err(AuthError::non_retryable_from_str(format!(
                "expected authorized_user credentials, found {}",
                authorized_user.cred_type
            )));
        }
        let endpoint = self
            .token_uri
            .or(authorized_user.token_uri)
            .unwrap_or_else(|| OAUTH2_ENDPOINT.to_string());
        let token_provider = UserTokenProvider {
            client_id: authorized_user.client_id,
            client_secret: authorized_user.client_secret,
            refresh_token: authorized_user.refresh_token,
            endpoint,
            scope: self.scope,
        };
        Ok(Credentials {
            inner: Arc::new(UserCredentials {
                token_provider: TokenCache::new(token_provider),
            }),
        })
    }
}

#[derive(Debug)]
struct UserCredentials<T>
where
    T: TokenProvider,
{
    token_provider: T,
}

#[async_trait::async_trait]
impl<T> CredentialsProvider for UserCredentials<T>
where
    T: TokenProvider + std::fmt::Debug,
{
    async fn get_token(&self) -> Result<Token> {
        self.token_provider.get_token().await
    }

    async fn get_headers(&self) -> Result<Vec<(HeaderName, HeaderValue)>> {
        let token = self.get_token().await?;
        build_bearer_headers(&token)
    }
}

struct UserTokenProvider {
    client_id: String,
    client_secret: String,
    refresh_token: String,
    endpoint: String,
    scope: Option<String>,
}

impl std::fmt::Debug for UserTokenProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserTokenProvider")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[censored]")
            .field("refresh_token", &"[censored]")
            .field("endpoint", &self.endpoint)
            .field("scope", &self.scope)
            .finish()
    }
}

#[async_trait::async_trait]
impl TokenProvider for UserTokenProvider {
    async fn get_token(&self) -> Result<Token> {
        let client = Client::new();
        let request = Oauth2RefreshRequest {
            grant_type: RefreshGrantType::RefreshToken,
            client_id: self.client_id.clone(),
            client_secret: self.client_secret.clone(),
            refresh_token: self.refresh_token.clone(),
            scope: self.scope.clone(),
        };
        let response = client
            .request(Method::POST, self.endpoint.as_str())
            .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
            .json(&request)
            .send()
            .await
            .map_err(AuthError::retryable)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .map_err(|e| AuthError::new(is_retryable(status), e))?;
            return Err(AuthError::from_str(
                is_retryable(status),
                format!("Failed to fetch token. {body}"),
            ));
        }
        let response = response
            .json::<Oauth2RefreshResponse>()
            .await
            .map_err(|e| {
                let retryable = !e.is_decode();
                AuthError::new(retryable, e)
            })?;
        Ok(Token {
            token: response.access_token,
            token_type: response.token_type,
            expires_at: response
                .expires_in
                .map(|d| std::time::Instant::now() + Duration::from_secs(d)),
        })
    }
}

/// The deserialized fields of an `authorized_user` file.
#[derive(Clone, Debug, PartialEq, Deserialize)]
struct AuthorizedUser {
    #[serde(rename = "type")]
    cred_type: String,
    client_id: String,
    client_secret: String,
    refresh_token: String,
    token_uri: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
enum RefreshGrantType {
    #[serde(rename = "refresh_token")]
    RefreshToken,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
struct Oauth2RefreshRequest {
    grant_type: RefreshGrantType,
    client_id: String,
    client_secret: String,
    refresh_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    scope: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
struct Oauth2RefreshResponse {
    access_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    expires_in: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    refresh_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    scope: Option<String>,
    token_type: String,
}
