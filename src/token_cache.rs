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

use crate::Result;
use crate::errors::AuthError;
use crate::token::{Token, TokenProvider};
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};
// Using tokio's Instant makes the cache testable with a paused clock.
use tokio::time::Instant;

/// Returns `true` if the token is expired, or if it is an error.
fn invalid(token: &Result<Token>) -> bool {
    match token {
        Ok(t) => t
            .expires_at
            .is_some_and(|expires_at| expires_at <= Instant::now().into_std()),
        Err(_) => true,
    }
}

/// Caches the most recent token from the wrapped provider.
///
/// Concurrent callers that find the cached token expired elect a single
/// refresher. Everybody else waits for that refresh to finish and shares its
/// outcome, so a thundering herd never reaches the token endpoint.
#[derive(Debug)]
pub(crate) struct TokenCache<T>
where
    T: TokenProvider,
{
    // The most recent token, or the most recent refresh error.
    token: Arc<Mutex<Result<Token>>>,

    // Tracks if a refresh is ongoing. If the lock is held, there is a refresh.
    refresh_in_progress: Arc<Mutex<()>>,
    // Wakes the callers waiting on the ongoing refresh.
    refresh_notify: Arc<Notify>,

    // The provider that performs the actual refreshes.
    inner: Arc<T>,
}

// Implemented by hand because the derive would demand `T: Clone`.
impl<T> Clone for TokenCache<T>
where
    T: TokenProvider,
{
    fn clone(&self) -> Self {
        Self {
            token: self.token.clone(),
            refresh_in_progress: self.refresh_in_progress.clone(),
            refresh_notify: self.refresh_notify.clone(),
            inner: self.inner.clone(),
        }
    }
}

impl<T> TokenCache<T>
where
    T: TokenProvider,
{
    pub(crate) fn new(inner: T) -> Self {
        Self {
            token: Arc::new(Mutex::new(Err(AuthError::retryable_from_str(
                "the token cache is empty",
            )))),
            refresh_in_progress: Arc::new(Mutex::new(())),
            refresh_notify: Arc::new(Notify::new()),
            inner: Arc::new(inner),
        }
    }

    async fn current_token(&self) -> Result<Token> {
        let guard = self.token.lock().await;
        guard.clone()
    }
}

#[async_trait::async_trait]
impl<T> TokenProvider for TokenCache<T>
where
    T: TokenProvider,
{
    async fn get_token(&self) -> Result<Token> {
        let token = self.current_token().await;
        if !invalid(&token) {
            return token;
        }

        match self.refresh_in_progress.try_lock() {
            Ok(_guard) => {
                // This caller does the refresh. The lock is held until the
                // new token is stored, then the waiters are released.
                let token = self.inner.get_token().await;
                *self.token.lock().await = token.clone();
                drop(_guard);
                self.refresh_notify.notify_waiters();
                token
            }
            Err(_) => {
                // A refresh is already underway, wait for its outcome.
                self.refresh_notify.notified().await;
                self.current_token().await
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::token::test::MockTokenProvider;
    use std::time::Duration;

    const TOKEN_VALID_DURATION: Duration = Duration::from_secs(3600);

    fn test_token(expires_at: Option<std::time::Instant>) -> Token {
        Token {
            token: "test-token".to_string(),
            token_type: "Bearer".to_string(),
            expires_at,
        }
    }

    #[tokio::test]
    async fn initial_token_success() {
        let mut mock = MockTokenProvider::new();
        mock.expect_get_token()
            .times(1)
            .returning(|| Ok(test_token(None)));

        let cache = TokenCache::new(mock);
        let token = cache.get_token().await.unwrap();
        assert_eq!(token.token, "test-token");

        // A non-expiring token stays cached, the provider is not called
        // again.
        let token = cache.get_token().await.unwrap();
        assert_eq!(token.token, "test-token");
    }

    #[tokio::test]
    async fn initial_token_failure() {
        let mut mock = MockTokenProvider::new();
        mock.expect_get_token()
            .times(2)
            .returning(|| Err(AuthError::retryable_from_str("fail")));

        let cache = TokenCache::new(mock);
        assert!(cache.get_token().await.is_err());

        // Errors are not cached as if they were valid tokens.
        assert!(cache.get_token().await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn expired_token_refreshed() {
        let expires_at = (Instant::now() + TOKEN_VALID_DURATION).into_std();
        let mut mock = MockTokenProvider::new();
        mock.expect_get_token()
            .times(1)
            .returning(move || Ok(test_token(Some(expires_at))));
        mock.expect_get_token().times(1).returning(|| {
            Ok(Token {
                token: "refreshed-token".to_string(),
                token_type: "Bearer".to_string(),
                expires_at: None,
            })
        });

        let cache = TokenCache::new(mock);
        let token = cache.get_token().await.unwrap();
        assert_eq!(token.token, "test-token");

        tokio::time::advance(TOKEN_VALID_DURATION).await;

        let token = cache.get_token().await.unwrap();
        assert_eq!(token.token, "refreshed-token");
    }

    #[tokio::test(start_paused = true)]
    async fn expired_token_refresh_failure() {
        let expires_at = (Instant::now() + TOKEN_VALID_DURATION).into_std();
        let mut mock = MockTokenProvider::new();
        mock.expect_get_token()
            .times(1)
            .returning(move || Ok(test_token(Some(expires_at))));
        mock.expect_get_token()
            .times(1)
            .returning(|| Err(AuthError::retryable_from_str("refresh failed")));

        let cache = TokenCache::new(mock);
        let token = cache.get_token().await.unwrap();
        assert_eq!(token.token, "test-token");

        tokio::time::advance(TOKEN_VALID_DURATION).await;

        let err = cache.get_token().await.unwrap_err();
        assert!(err.to_string().contains("refresh failed"), "{err}");
    }

    #[derive(Debug)]
    struct FakeTokenProvider {
        result: Result<Token>,
        calls: Arc<std::sync::Mutex<i32>>,
    }

    #[async_trait::async_trait]
    impl TokenProvider for FakeTokenProvider {
        async fn get_token(&self) -> Result<Token> {
            // Slow enough that the other tasks pile up behind the refresh.
            tokio::time::sleep(Duration::from_millis(50)).await;
            *self.calls.lock().unwrap() += 1;
            self.result.clone()
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn thundering_herd_success() {
        let calls = Arc::new(std::sync::Mutex::new(0));
        let provider = FakeTokenProvider {
            result: Ok(test_token(None)),
            calls: calls.clone(),
        };
        let cache = TokenCache::new(provider);

        let tasks = (0..100)
            .map(|_| {
                let cache = cache.clone();
                tokio::spawn(async move { cache.get_token().await })
            })
            .collect::<Vec<_>>();
        for task in tasks {
            let token = task.await.unwrap().unwrap();
            assert_eq!(token.token, "test-token");
        }

        // Far fewer fetches than callers. Exactly one when nobody raced the
        // first read, but a few stragglers may start a second refresh.
        assert!(*calls.lock().unwrap() < 100);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn thundering_herd_failure() {
        let calls = Arc::new(std::sync::Mutex::new(0));
        let provider = FakeTokenProvider {
            result: Err(AuthError::retryable_from_str("herd failure")),
            calls: calls.clone(),
        };
        let cache = TokenCache::new(provider);

        let tasks = (0..100)
            .map(|_| {
                let cache = cache.clone();
                tokio::spawn(async move { cache.get_token().await })
            })
            .collect::<Vec<_>>();
        for task in tasks {
            let err = task.await.unwrap().unwrap_err();
            assert!(err.to_string().contains("herd failure"), "{err}");
        }

        assert!(*calls.lock().unwrap() < 100);
    }
}
