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

//! [Credentials] built from a PKCS#12 service account key.
//!
//! This is the oldest service account format: a `.p12` archive holding the
//! account's private key, paired with the account email configured
//! separately. These credentials sign a JWT assertion with the key and
//! exchange it at the OAuth2 token endpoint for an access token, the
//! `urn:ietf:params:oauth:grant-type:jwt-bearer` grant.
//!
//! The archive is read and parsed when the credentials are built, so a bad
//! keyfile fails fast. The token exchange happens lazily, on first token
//! use, and the result is cached until it expires.

use crate::Result;
use crate::credentials::Credentials;
use crate::credentials::dynamic::CredentialsProvider;
use crate::credentials::jws::{CLOCK_SKEW_FUDGE, DEFAULT_TOKEN_TIMEOUT, JwsClaims, JwsHeader};
use crate::errors::{AuthError, is_retryable};
use crate::headers_util::build_bearer_headers;
use crate::token::{Token, TokenProvider};
use crate::token_cache::TokenCache;
use base64::Engine;
use base64::prelude::BASE64_URL_SAFE_NO_PAD;
use http::header::{HeaderName, HeaderValue};
use p12::PFX;
use reqwest::{Client, Method};
use rustls::crypto::CryptoProvider;
use rustls::sign::Signer;
use rustls_pki_types::{PrivateKeyDer, PrivatePkcs8KeyDer};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;

/// The token endpoint, and also the audience claimed by each assertion.
const OAUTH2_TOKEN_URI: &str = "https://accounts.google.com/o/oauth2/token";

// Google issues PKCS#12 service account keys encrypted with this fixed
// passphrase.
const P12_PASSPHRASE: &str = "notasecret";

/// A builder for PKCS#12 service account [Credentials].
pub struct Builder {
    p12_keyfile: PathBuf,
    service_account_email: String,
    scope: Option<String>,
    token_uri: Option<String>,
}

impl Builder {
    /// Creates a builder for the given keyfile and service account.
    pub fn new<P: Into<PathBuf>, S: Into<String>>(p12_keyfile: P, service_account_email: S) -> Self {
        Self {
            p12_keyfile: p12_keyfile.into(),
            service_account_email: service_account_email.into(),
            scope: None,
            token_uri: None,
        }
    }

    /// Sets the scope requested in the signed assertion.
    pub fn with_scope<S: Into<String>>(mut self, scope: S) -> Self {
        self.scope = Some(scope.into());
        self
    }

    /// Overrides the token endpoint, primarily for testing.
    ///
    /// The audience claimed by the assertion follows the override, so the
    /// assertion stays consistent with the endpoint that receives it.
    pub fn with_token_uri<S: Into<String>>(mut self, token_uri: S) -> Self {
        self.token_uri = Some(token_uri.into());
        self
    }

    /// Reads the keyfile and returns [Credentials] that exchange signed
    /// assertions for access tokens.
    ///
    /// # Errors
    ///
    /// Fails if the keyfile cannot be read, is not a PKCS#12 archive, does
    /// not verify against the fixed passphrase, or holds no private key.
    pub fn build(self) -> Result<Credentials> {
        let private_key = load_private_key(&self.p12_keyfile)?;
        let token_provider = PrivateKeyTokenProvider {
            service_account_email: self.service_account_email,
            private_key,
            scope: self.scope,
            token_uri: self
                .token_uri
                .unwrap_or_else(|| OAUTH2_TOKEN_URI.to_string()),
        };
        Ok(Credentials {
            inner: Arc::new(PrivateKeyCredentials {
                token_provider: TokenCache::new(token_provider),
            }),
        })
    }
}

// Extracts the PKCS#8 DER private key from a PKCS#12 archive.
fn load_private_key(path: &Path) -> Result<Vec<u8>> {
    let bytes = std::fs::read(path).map_err(|e| {
        AuthError::non_retryable_from_str(format!(
            "failed to read PKCS#12 keyfile {}, {e}",
            path.display()
        ))
    })?;
    let pfx = PFX::parse(&bytes).map_err(AuthError::non_retryable)?;
    if !pfx.verify_mac(P12_PASSPHRASE) {
        return Err(AuthError::non_retryable_from_str(format!(
            "PKCS#12 MAC verification failed for {}",
            path.display()
        )));
    }
    pfx.key_bags(P12_PASSPHRASE)
        .map_err(AuthError::non_retryable)?
        .into_iter()
        .next()
        .ok_or_else(|| {
            AuthError::non_retryable_from_str(format!(
                "no private key found in PKCS#12 keyfile {}",
                path.display()
            ))
        })
}

#[derive(Debug)]
struct PrivateKeyCredentials<T>
where
    T: TokenProvider,
{
    token_provider: T,
}

#[async_trait::async_trait]
impl<T> CredentialsProvider for PrivateKeyCredentials<T>
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

struct PrivateKeyTokenProvider {
    service_account_email: String,
    private_key: Vec<u8>,
    scope: Option<String>,
    token_uri: String,
}

impl std::fmt::Debug for PrivateKeyTokenProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrivateKeyTokenProvider")
            .field("service_account_email", &self.service_account_email)
            .field("private_key", &"[censored]")
            .field("scope", &self.scope)
            .field("token_uri", &self.token_uri)
            .finish()
    }
}

#[async_trait::async_trait]
impl TokenProvider for PrivateKeyTokenProvider {
    async fn get_token(&self) -> Result<Token> {
        let assertion = self.assertion()?;
        let client = Client::new();
        let request = Oauth2AssertionRequest {
            grant_type: AssertionGrantType::JwtBearer,
            assertion,
        };
        let response = client
            .request(Method::POST, self.token_uri.as_str())
            .form(&request)
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
            .json::<Oauth2AssertionResponse>()
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

impl PrivateKeyTokenProvider {
    // The RS256-signed JWT presented to the token endpoint.
    fn assertion(&self) -> Result<String> {
        let signer = self.signer()?;
        // The claimed issue time is backdated to tolerate clock skew.
        let now = OffsetDateTime::now_utc() - CLOCK_SKEW_FUDGE;
        let claims = JwsClaims {
            iss: self.service_account_email.clone(),
            scope: self.scope.clone(),
            aud: Some(self.token_uri.clone()),
            exp: now + DEFAULT_TOKEN_TIMEOUT,
            iat: now,
            typ: None,
            sub: None,
        };
        let header = JwsHeader {
            alg: "RS256",
            typ: "JWT",
            kid: None,
        };
        let encoded_header_claims = format!("{}.{}", header.encode()?, claims.encode()?);
        let sig = signer
            .sign(encoded_header_claims.as_bytes())
            .map_err(AuthError::non_retryable)?;
        Ok(format!(
            "{}.{}",
            encoded_header_claims,
            BASE64_URL_SAFE_NO_PAD.encode(sig)
        ))
    }

    fn signer(&self) -> Result<Box<dyn Signer>> {
        let key_provider = CryptoProvider::get_default().map_or_else(
            || rustls::crypto::ring::default_provider().key_provider,
            |p| p.key_provider,
        );
        let key = PrivatePkcs8KeyDer::from(self.private_key.clone());
        let sk = key_provider
            .load_private_key(PrivateKeyDer::from(key))
            .map_err(AuthError::non_retryable)?;
        sk.choose_scheme(&[rustls::SignatureScheme::RSA_PKCS1_SHA256])
            .ok_or_else(|| {
                AuthError::non_retryable_from_str(
                    "Unable to choose RSA_PKCS1_SHA256 signing scheme as it is not supported by current signer",
                )
            })
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
enum AssertionGrantType {
    #[serde(rename = "urn:ietf:params:oauth:grant-type:jwt-bearer")]
    JwtBearer,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
struct Oauth2AssertionRequest {
    grant_type: AssertionGrantType,
    assertion: String,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
struct Oauth2AssertionResponse {
    access_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    expires_in: Option<u64>,
    token_type: String,
}
