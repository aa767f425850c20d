// Copyright 2021-Present Datadog, Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#![deny(clippy::disallowed_methods)]

//! Small helpers shared by every mapwright crate.

pub mod rate_limited_tracing;

use std::fmt::Debug;
use std::str::FromStr;

use tracing::{error, info};

/// Installs a compact logger for unit tests. Calling it several times is harmless.
pub fn setup_logging_for_tests() {
    let _ = env_logger::builder()
        .format_timestamp(None)
        .is_test(true)
        .try_init();
}

/// Reads `key` from the environment and parses it, falling back to `default_value` when the
/// variable is missing or cannot be parsed.
pub fn get_from_env<T: FromStr + Debug>(key: &str, default_value: T) -> T {
    if let Ok(value_str) = std::env::var(key) {
        if let Ok(value) = T::from_str(&value_str) {
            info!(value=?value, "setting `{}` from environment", key);
            return value;
        } else {
            error!(value_str=%value_str, "failed to parse `{}` from environment", key);
        }
    }
    info!(value=?default_value, "using default `{}`", key);
    default_value
}

/// Returns `true`. Used as a `#[serde(default = "...")]` target.
pub const fn true_fn() -> bool {
    true
}

/// Serde `skip_serializing_if` helper.
pub fn is_true(value: &bool) -> bool {
    *value
}

/// Serde `skip_serializing_if` helper.
pub fn is_false(value: &bool) -> bool {
    !*value
}
