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

//! [Credentials] from the compute-instance metadata service.
//!
//! On Compute Engine, GKE, and the other compute platforms, the metadata
//! service hands out access tokens for the instance's service account. No
//! local key material is involved, so building these credentials does no
//! I/O at all; the service is contacted on first token use.

use crate::Result;
use crate::credentials::Credentials;
use crate::credentials::dynamic::CredentialsProvider;
use crate::errors::{AuthError, is_retryable};
use crate::headers_util::build_bearer_headers;
use crate::token::{Token, TokenProvider};
use crate::token_cache::TokenCache;
use http::header::{HeaderName, HeaderValue};
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

const METADATA_FLAVOR_VALUE: &str = "Google";
const METADATA_FLAVOR: &str = "metadata-flavor";
const METADATA_ROOT: &str = "http://metadata.google.internal/computeMetadata/v1";

/// A builder for metadata-service [Credentials].
///
/// # Example
///
/// ```
/// # use bqsink_auth::credentials::compute_engine::Builder;
/// let credentials = Builder::default()
///     .with_scope("https://www.googleapis.com/auth/bigquery")
///     .build();
/// ```
#[derive(Debug, Default)]
pub struct Builder {
    endpoint: Option<String>,
    scope: Option<String>,
}

impl Builder {
    /// Overrides the metadata service endpoint, primarily for testing.
    pub fn with_endpoint<S: Into<String>>(mut self, endpoint: S) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Sets the scope requested for each access token.
    ///
    /// Without a scope the metadata service falls back to the scopes
    /// configured on the instance.
    pub fn with_scope<S: Into<String>>(mut self, scope: S) -> Self {
        self.scope = Some(scope.into());
        self
    }

    /// Returns [Credentials] that fetch tokens from the metadata service.
    pub fn build(self) -> Credentials {
        let token_provider = MDSAccessTokenProvider {
            endpoint: self.endpoint.unwrap_or_else(|| METADATA_ROOT.to_string()),
            scope: self.scope,
        };
        Credentials {
            inner: Arc::new(MDSCredentials {
                token_provider: TokenCache::new(token_provider),
            }),
        }
    }
}

#[derive(Debug)]
struct MDSCredentials<T>
where
    T: TokenProvider,
{
    token_provider: T,
}

#[async_trait::async_trait]
impl<T> CredentialsProvider for MDSCredentials<T>
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

#[derive(Debug)]
struct MDSAccessTokenProvider {
    endpoint: String,
    scope: Option<String>,
}

#[async_trait::async_trait]
impl TokenProvider for MDSAccessTokenProvider {
    async fn get_token(&self) -> Result<Token> {
        let client = Client::new();
        let mut request = client
            .get(format!(
                "{}/instance/service-accounts/default/token",
                self.endpoint
            ))
            .header(
                METADATA_FLAVOR,
                HeaderValue::from_static(METADATA_FLAVOR_VALUE),
            );
        if let Some(scope) = &self.scope {
            request = request.query(&[("scopes", scope)]);
        }
        let response = request.send().await.map_err(AuthError::retryable)?;

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
            .json::<MDSTokenResponse>()
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

#[derive(Clone, Debug, PartialEq, Deserialize)]
struct MDSTokenResponse {
    access_token: String,
    expires_in: Option<u64>,
    token_type: String,
}
