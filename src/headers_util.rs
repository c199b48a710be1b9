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
use crate::token::Token;
use http::header::{AUTHORIZATION, HeaderName, HeaderValue};

/// Builds the `Authorization:` header for a token.
///
/// The value is marked sensitive so it is skipped when requests are logged.
pub(crate) fn build_bearer_headers(token: &Token) -> Result<Vec<(HeaderName, HeaderValue)>> {
    let mut value = HeaderValue::from_str(&format!("{} {}", token.token_type, token.token))
        .map_err(AuthError::non_retryable)?;
    value.set_sensitive(true);
    Ok(vec![(AUTHORIZATION, value)])
}
