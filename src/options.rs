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

use crate::config::ClientConfig;
use std::time::Duration;

/// The client settings derived from a [ClientConfig].
///
/// This is what a [ClientFactory][crate::provider::ClientFactory] receives:
/// the retry and timeout knobs a client needs, with the durations already
/// converted, and none of the credential fields.
#[derive(Clone, Debug, PartialEq)]
pub struct ClientOptions {
    application_name: String,
    retries: u32,
    timeout: Duration,
    open_timeout: Duration,
}

impl ClientOptions {
    pub(crate) fn new(config: &ClientConfig) -> Self {
        Self {
            application_name: config.application_name.clone(),
            retries: config.retries,
            timeout: Duration::from_secs(config.timeout_sec),
            open_timeout: Duration::from_secs(config.open_timeout_sec),
        }
    }

    /// The name reported in the client's user agent.
    pub fn application_name(&self) -> &str {
        &self.application_name
    }

    /// How many times failed API calls are retried.
    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// The per-request timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// The connection-open timeout.
    pub fn open_timeout(&self) -> Duration {
        self.open_timeout
    }
}
