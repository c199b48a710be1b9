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

//! Authenticated client acquisition and caching.

use crate::config::ClientConfig;
use crate::credentials::{Credentials, build_credentials};
use crate::errors::Error;
use crate::options::ClientOptions;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// How long a built client is served from the cache before it is rebuilt.
///
/// Deliberately decoupled from the lifetime of whatever token the client's
/// credentials hold: tokens refresh inside the credentials, while this bound
/// forces a periodic rebuild of the client itself.
pub(crate) const CLIENT_TTL: std::time::Duration = std::time::Duration::from_secs(1800);

/// Produces the application's client type for a [ClientProvider].
///
/// The provider stays independent of any concrete API client. It prepares
/// [ClientOptions] and [Credentials], and the factory turns the pair into
/// whatever client the application uses.
pub trait ClientFactory: Send + Sync {
    /// The client type this factory builds.
    type Client: Send + Sync + 'static;

    /// Builds a client with the given settings and authorization.
    fn build(&self, options: ClientOptions, credentials: Credentials) -> Self::Client;
}

// A built client and the instant it goes stale.
struct CachedClient<C> {
    client: Arc<C>,
    expires_at: Instant,
}

/// Hands out authenticated clients, caching each for [CLIENT_TTL].
///
/// See the [crate] documentation for an example.
pub struct ClientProvider<F>
where
    F: ClientFactory,
{
    config: ClientConfig,
    scope: String,
    factory: F,
    cached: Mutex<Option<CachedClient<F::Client>>>,
}

impl<F> ClientProvider<F>
where
    F: ClientFactory,
{
    /// Creates a provider for the given configuration and permission scope.
    ///
    /// Nothing is validated here. Configuration problems, including an
    /// unknown `auth_method`, surface on the first [get_client][Self::get_client] call.
    pub fn new<S: Into<String>>(config: ClientConfig, scope: S, factory: F) -> Self {
        Self {
            config,
            scope: scope.into(),
            factory,
            cached: Mutex::new(None),
        }
    }

    /// Returns an authenticated client, building one if the cache is empty
    /// or stale.
    ///
    /// Callers receive the same client until its cache entry expires; the
    /// next caller after that rebuilds it, re-running credential discovery
    /// from scratch. Concurrent callers never build more than one client:
    /// the build happens inside the cache lock and everybody else waits for
    /// it.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for an unknown authentication method
    /// or a missing configuration field, and an auth error when credential
    /// material cannot be loaded. A failed build leaves the cache empty, so
    /// the next call starts over.
    pub async fn get_client(&self) -> std::result::Result<Arc<F::Client>, Error> {
        let mut cached = self.cached.lock().await;
        if let Some(entry) = cached.as_ref() {
            if entry.expires_at > Instant::now() {
                return Ok(entry.client.clone());
            }
        }
        // A failure below must leave the cache empty, never stale.
        *cached = None;

        let options = ClientOptions::new(&self.config);
        tracing::debug!(
            application_name = options.application_name(),
            retries = options.retries(),
            timeout_sec = options.timeout().as_secs(),
            open_timeout_sec = options.open_timeout().as_secs(),
            auth_method = %self.config.auth_method,
            "building authenticated client"
        );
        let credentials = build_credentials(&self.config, &self.scope)?;
        let client = Arc::new(self.factory.build(options, credentials));
        *cached = Some(CachedClient {
            client: client.clone(),
            expires_at: Instant::now() + CLIENT_TTL,
        });
        Ok(client)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::AuthMethod;
    use serde_json::json;

    const SCOPE: &str = "https://www.googleapis.com/auth/bigquery";

    #[derive(Debug)]
    struct TestClient {
        options: ClientOptions,
        credentials: Credentials,
    }

    struct TestFactory {
        calls: Arc<std::sync::Mutex<i32>>,
    }

    impl TestFactory {
        fn new() -> Self {
            Self {
                calls: Arc::new(std::sync::Mutex::new(0)),
            }
        }
    }

    impl ClientFactory for TestFactory {
        type Client = TestClient;

        fn build(&self, options: ClientOptions, credentials: Credentials) -> TestClient {
            *self.calls.lock().unwrap() += 1;
            TestClient {
                options,
                credentials,
            }
        }
    }

    fn compute_engine_config() -> ClientConfig {
        ClientConfig {
            application_name: "test-app".to_string(),
            auth_method: AuthMethod::ComputeEngine,
            ..ClientConfig::default()
        }
    }

    #[tokio::test]
    async fn client_built_once_within_ttl() {
        let factory = TestFactory::new();
        let calls = factory.calls.clone();
        let provider = ClientProvider::new(compute_engine_config(), SCOPE, factory);

        let first = provider.get_client().await.unwrap();
        assert_eq!(first.options.application_name(), "test-app");
        let fmt = format!("{:?}", first.credentials);
        assert!(fmt.contains("MDSCredentials"), "{fmt}");

        let second = provider.get_client().await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(*calls.lock().unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn client_rebuilt_at_ttl() {
        let factory = TestFactory::new();
        let calls = factory.calls.clone();
        let provider = ClientProvider::new(compute_engine_config(), SCOPE, factory);

        let first = provider.get_client().await.unwrap();

        // One second before the deadline the entry is still fresh.
        tokio::time::advance(CLIENT_TTL - std::time::Duration::from_secs(1)).await;
        let second = provider.get_client().await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(*calls.lock().unwrap(), 1);

        // At the deadline the entry is stale.
        tokio::time::advance(std::time::Duration::from_secs(1)).await;
        let third = provider.get_client().await.unwrap();
        assert!(!Arc::ptr_eq(&first, &third));
        assert_eq!(*calls.lock().unwrap(), 2);
    }

    #[tokio::test]
    async fn unknown_method_rejected_without_building() {
        let config = ClientConfig {
            auth_method: AuthMethod::Other("oauth".to_string()),
            ..ClientConfig::default()
        };
        let factory = TestFactory::new();
        let calls = factory.calls.clone();
        let provider = ClientProvider::new(config, SCOPE, factory);

        let err = provider.get_client().await.unwrap_err();
        assert!(err.is_config(), "{err:?}");
        assert_eq!(err.to_string(), "unknown auth method: oauth");
        assert_eq!(*calls.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn failed_build_retried_from_scratch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("key.json");
        let config = ClientConfig {
            auth_method: AuthMethod::JsonKey,
            json_keyfile: Some(path.to_str().unwrap().to_string()),
            ..ClientConfig::default()
        };
        let factory = TestFactory::new();
        let calls = factory.calls.clone();
        let provider = ClientProvider::new(config, SCOPE, factory);

        // The keyfile does not exist yet, and its path is not valid JSON
        // either.
        let err = provider.get_client().await.unwrap_err();
        assert!(err.is_auth(), "{err:?}");
        assert_eq!(*calls.lock().unwrap(), 0);

        // Nothing was cached, so the next call re-runs discovery and finds
        // the key.
        let key = json!({
            "type": "service_account",
            "client_email": "test-client-email",
            "private_key_id": "test-private-key-id",
            "private_key": "",
        });
        std::fs::write(&path, key.to_string()).unwrap();
        let client = provider.get_client().await.unwrap();
        assert_eq!(client.options.application_name(), "bqsink");
        assert_eq!(*calls.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn missing_p12_keyfile_leaves_cache_empty() {
        let config = ClientConfig {
            auth_method: AuthMethod::PrivateKey,
            p12_keyfile: Some(std::path::PathBuf::from("/file-does-not-exist.p12")),
            service_account_email: Some("loader@test-project.iam.gserviceaccount.com".to_string()),
            ..ClientConfig::default()
        };
        let factory = TestFactory::new();
        let calls = factory.calls.clone();
        let provider = ClientProvider::new(config, SCOPE, factory);

        let err = provider.get_client().await.unwrap_err();
        assert!(err.is_auth(), "{err:?}");
        assert!(
            err.to_string().contains("failed to read PKCS#12 keyfile"),
            "{err}"
        );
        assert_eq!(*calls.lock().unwrap(), 0);

        // The failure is not cached; the next call reads the filesystem
        // again.
        let err = provider.get_client().await.unwrap_err();
        assert!(err.is_auth(), "{err:?}");
        assert_eq!(*calls.lock().unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn rebuild_failure_empties_cache() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("key.json");
        let key = json!({
            "type": "service_account",
            "client_email": "test-client-email",
            "private_key_id": "test-private-key-id",
            "private_key": "",
        });
        std::fs::write(&path, key.to_string()).unwrap();

        let config = ClientConfig {
            auth_method: AuthMethod::JsonKey,
            json_keyfile: Some(path.to_str().unwrap().to_string()),
            ..ClientConfig::default()
        };
        let factory = TestFactory::new();
        let calls = factory.calls.clone();
        let provider = ClientProvider::new(config, SCOPE, factory);

        provider.get_client().await.unwrap();
        assert_eq!(*calls.lock().unwrap(), 1);

        // Break the keyfile, let the cache entry lapse, and the rebuild
        // fails without leaving the stale client behind.
        std::fs::write(&path, "no longer json").unwrap();
        tokio::time::advance(CLIENT_TTL).await;
        let err = provider.get_client().await.unwrap_err();
        assert!(err.is_auth(), "{err:?}");
        assert_eq!(*calls.lock().unwrap(), 1);

        // Restore the keyfile and the next call succeeds again.
        std::fs::write(&path, key.to_string()).unwrap();
        let client = provider.get_client().await.unwrap();
        assert_eq!(client.options.application_name(), "bqsink");
        assert_eq!(*calls.lock().unwrap(), 2);
    }
}
