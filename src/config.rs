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

//! User-supplied configuration for client acquisition.

use serde::Deserialize;
use std::path::PathBuf;

/// The authentication method to use when building a client.
///
/// The serialized names match the values accepted in configuration files
/// (`"private_key"`, `"compute_engine"`, `"json_key"`,
/// `"application_default"`). Any other value deserializes into
/// [AuthMethod::Other] and is rejected when a client is requested, not when
/// the configuration is read.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    /// A PKCS#12 service account key, exchanged for access tokens through
    /// the signed-assertion flow.
    PrivateKey,
    /// The compute-instance metadata service.
    ComputeEngine,
    /// A JSON service account key, given by path or by value.
    JsonKey,
    /// The application default credentials discovery chain.
    #[default]
    ApplicationDefault,
    /// An unrecognized method name, kept verbatim for error reporting.
    #[serde(untagged)]
    Other(String),
}

impl std::fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthMethod::PrivateKey => write!(f, "private_key"),
            AuthMethod::ComputeEngine => write!(f, "compute_engine"),
            AuthMethod::JsonKey => write!(f, "json_key"),
            AuthMethod::ApplicationDefault => write!(f, "application_default"),
            AuthMethod::Other(method) => write!(f, "{method}"),
        }
    }
}

/// Configuration for [ClientProvider][crate::provider::ClientProvider].
///
/// Which fields are required depends on the authentication method:
/// `private_key` needs `p12_keyfile` and `service_account_email`, `json_key`
/// needs `json_keyfile`, and the other methods need no extra fields. Missing
/// fields surface as configuration errors when a client is requested.
#[derive(Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Reported to the service in the client's user agent.
    pub application_name: String,
    /// Selects how credentials are obtained.
    pub auth_method: AuthMethod,
    /// Path to a PKCS#12 service account key.
    pub p12_keyfile: Option<PathBuf>,
    /// The service account to authenticate as, e.g.
    /// `loader@my-project.iam.gserviceaccount.com`.
    pub service_account_email: Option<String>,
    /// A JSON service account key: either a path to a key file, or the key
    /// itself.
    pub json_keyfile: Option<String>,
    /// How many times the built client retries failed API calls.
    pub retries: u32,
    /// Per-request timeout, in seconds.
    pub timeout_sec: u64,
    /// Connection-open timeout, in seconds.
    pub open_timeout_sec: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            application_name: "bqsink".to_string(),
            auth_method: AuthMethod::default(),
            p12_keyfile: None,
            service_account_email: None,
            json_keyfile: None,
            retries: 5,
            timeout_sec: 300,
            open_timeout_sec: 300,
        }
    }
}

/// `json_keyfile` may hold the key itself, so it is never printed.
impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("application_name", &self.application_name)
            .field("auth_method", &self.auth_method)
            .field("p12_keyfile", &self.p12_keyfile)
            .field("service_account_email", &self.service_account_email)
            .field("json_keyfile", &self.json_keyfile.as_ref().map(|_| "[censored]"))
            .field("retries", &self.retries)
            .field("timeout_sec", &self.timeout_sec)
            .field("open_timeout_sec", &self.open_timeout_sec)
            .finish()
    }
}
