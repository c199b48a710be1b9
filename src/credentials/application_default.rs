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

//! The application default credentials discovery chain.
//!
//! Looks for ambient credentials the way the `gcloud` tooling and the other
//! Google client libraries do:
//!
//! 1. the file named by the `GOOGLE_APPLICATION_CREDENTIALS` environment
//!    variable,
//! 2. the well-known file written by `gcloud auth application-default
//!    login`,
//! 3. the compute-instance metadata service.
//!
//! A file found by the first two steps may hold either an
//! `authorized_user` or a `service_account` credential. Discovery only
//! reads local files; the metadata fallback builds credentials without
//! contacting the service.

use crate::Result;
use crate::credentials::{Credentials, compute_engine, service_account, user_account};
use crate::errors::AuthError;

pub(crate) const GOOGLE_APPLICATION_CREDENTIALS: &str = "GOOGLE_APPLICATION_CREDENTIALS";

/// Resolves [Credentials] from the discovery chain.
pub(crate) fn build(scope: &str) -> Result<Credentials> {
    match load_adc()? {
        AdcContents::Contents(contents) => {
            let js = serde_json::from_str(&contents).map_err(AuthError::non_retryable)?;
            build_credentials_from_json(js, scope)
        }
        AdcContents::FallbackToMds => {
            Ok(compute_engine::Builder::default().with_scope(scope).build())
        }
    }
}

enum AdcPath {
    FromEnv(String),
    WellKnown(String),
}

enum AdcContents {
    Contents(String),
    FallbackToMds,
}

fn path_not_found(path: String) -> AuthError {
    AuthError::non_retryable_from_str(format!(
        "Failed to load Application Default Credentials (ADC) from {path}. Check that the `{GOOGLE_APPLICATION_CREDENTIALS}` environment variable points to a valid file."
    ))
}

fn adc_path() -> Option<AdcPath> {
    if let Ok(path) = std::env::var(GOOGLE_APPLICATION_CREDENTIALS) {
        return Some(AdcPath::FromEnv(path));
    }
    Some(AdcPath::WellKnown(adc_well_known_path()?))
}

/// The path to the file written by `gcloud auth application-default login`.
fn adc_well_known_path() -> Option<String> {
    #[cfg(target_os = "windows")]
    let root = std::env::var("APPDATA").ok();
    #[cfg(not(target_os = "windows"))]
    let root = std::env::var("HOME").ok().map(|home| home + "/.config");
    root.map(|root| root + "/gcloud/application_default_credentials.json")
}

fn load_adc() -> Result<AdcContents> {
    match adc_path() {
        None => Ok(AdcContents::FallbackToMds),
        Some(AdcPath::FromEnv(path)) => match std::fs::read_to_string(&path) {
            Ok(contents) => Ok(AdcContents::Contents(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(path_not_found(path)),
            Err(e) => Err(AuthError::non_retryable(e)),
        },
        Some(AdcPath::WellKnown(path)) => match std::fs::read_to_string(path) {
            Ok(contents) => Ok(AdcContents::Contents(contents)),
            // No gcloud login on this machine, try the metadata service.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(AdcContents::FallbackToMds),
            Err(e) => Err(AuthError::non_retryable(e)),
        },
    }
}

fn build_credentials_from_json(js: serde_json::Value, scope: &str) -> Result<Credentials> {
    let cred_type = js
        .get("type")
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| {
            AuthError::non_retryable_from_str(
                "Failed to parse Application Default Credentials (ADC). No `type` field found.",
            )
        })?;
    match cred_type {
        "authorized_user" => user_account::creds_from(js, scope),
        "service_account" => service_account::creds_from(js, scope),
        _ => Err(AuthError::non_retryable_from_str(format!(
            "Unimplemented credential type: {cred_type}"
        ))),
    }
}
