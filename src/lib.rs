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

//! Authenticated Google API client acquisition and caching for bqsink.
//!
//! The entry point is [provider::ClientProvider]. Given a
//! [config::ClientConfig] describing an authentication method, a permission
//! scope, and a [provider::ClientFactory] that produces the application's
//! concrete client type, the provider builds an authenticated client on
//! demand and serves it from a cache for a bounded lifetime. When the cache
//! entry goes stale the next caller rebuilds it, re-running credential
//! discovery from scratch.
//!
//! Four authentication methods are supported: PKCS#12 service account keys
//! (`private_key`), the compute-instance metadata service
//! (`compute_engine`), JSON service account keys passed by path or by value
//! (`json_key`), and the standard application default credentials discovery
//! chain (`application_default`).
//!
//! ## Example
//!
//! ```
//! # use bqsink_auth::config::{AuthMethod, ClientConfig};
//! # use bqsink_auth::credentials::Credentials;
//! # use bqsink_auth::errors::Error;
//! # use bqsink_auth::options::ClientOptions;
//! # use bqsink_auth::provider::{ClientFactory, ClientProvider};
//! struct BigQueryFactory;
//!
//! struct BigQueryClient {
//!     options: ClientOptions,
//!     credentials: Credentials,
//! }
//!
//! impl ClientFactory for BigQueryFactory {
//!     type Client = BigQueryClient;
//!     fn build(&self, options: ClientOptions, credentials: Credentials) -> BigQueryClient {
//!         BigQueryClient {
//!             options,
//!             credentials,
//!         }
//!     }
//! }
//!
//! # tokio_test::block_on(async {
//! let config = ClientConfig {
//!     application_name: "bqsink-example".to_string(),
//!     auth_method: AuthMethod::ComputeEngine,
//!     ..ClientConfig::default()
//! };
//! let provider = ClientProvider::new(
//!     config,
//!     "https://www.googleapis.com/auth/bigquery",
//!     BigQueryFactory,
//! );
//! let client = provider.get_client().await?;
//! println!("application: {}", client.options.application_name());
//! # let _ = &client.credentials;
//! # Ok::<(), Error>(())
//! # });
//! ```

pub mod config;
pub mod credentials;
pub mod errors;
pub mod options;
pub mod provider;
pub mod token;

pub(crate) mod headers_util;
pub(crate) mod token_cache;

pub(crate) type Result<T> = std::result::Result<T, crate::errors::AuthError>;
