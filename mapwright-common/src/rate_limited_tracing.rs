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

//! Per call site log budgets.
//!
//! Document parsing can hit the same warning once per document, so the hot warnings go through
//! these macros, which cap each call site to a number of lines per minute.

use std::sync::atomic::{AtomicU64, Ordering};

use coarsetime::{Duration, Instant};

const BUDGET_WINDOW_SECS: u64 = 60;

/// State of a call site, packed into a single `AtomicU64`.
///
/// The lower 32 bits count the lines requested since the window was opened, so the fast path
/// is a plain `fetch_add`. The upper 32 bits hold the window number, which only serves to detect
/// concurrent window resets.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
struct CallSiteBudget {
    window: u32,
    count: u32,
}

impl From<u64> for CallSiteBudget {
    fn from(packed: u64) -> CallSiteBudget {
        CallSiteBudget {
            window: (packed >> 32) as u32,
            count: packed as u32,
        }
    }
}

impl From<CallSiteBudget> for u64 {
    fn from(budget: CallSiteBudget) -> u64 {
        ((budget.window as u64) << 32) | budget.count as u64
    }
}

/// Consumes one unit of the call site budget and returns whether the line should be emitted.
///
/// `window_start` holds the coarse tick at which the current window was opened.
pub fn should_log<F: Fn() -> Instant>(
    budget: &AtomicU64,
    window_start: &AtomicU64,
    limit_per_min: u32,
    now: F,
) -> bool {
    let previous = budget.fetch_add(1, Ordering::Acquire);
    if previous == 0 {
        window_start.store(now().as_ticks(), Ordering::Release);
    }
    let CallSiteBudget { window, count } = previous.into();
    if count < limit_per_min {
        return true;
    }
    let current_ticks = Duration::from_ticks(now().as_ticks());
    let opened_at = Duration::from_ticks(window_start.load(Ordering::Acquire));
    if current_ticks.abs_diff(opened_at) < Duration::from_secs(BUDGET_WINDOW_SECS) {
        return false;
    }
    let mut opened_new_window = false;
    let logged = budget
        .fetch_update(Ordering::Release, Ordering::Acquire, |packed| {
            let mut current: CallSiteBudget = packed.into();
            if current.window == window {
                opened_new_window = true;
                let next = CallSiteBudget {
                    window: window.wrapping_add(1),
                    count: 1,
                };
                return Some(next.into());
            }
            // Another thread already opened the next window.
            opened_new_window = false;
            if current.count < limit_per_min {
                current.count += 1;
                Some(current.into())
            } else {
                None
            }
        })
        .is_ok();
    if opened_new_window {
        window_start.store(current_ticks.as_ticks(), Ordering::Release);
    }
    logged
}

#[macro_export]
macro_rules! rate_limited_tracing {
    ($log_fn:ident, limit_per_min=$limit:literal, $($args:tt)*) => {{
        use ::std::sync::atomic::AtomicU64;
        use $crate::rate_limited_tracing::CoarsetimeInstant;

        static BUDGET: AtomicU64 = AtomicU64::new(0);
        static WINDOW_START: AtomicU64 = AtomicU64::new(0);

        if $crate::rate_limited_tracing::should_log(
            &BUDGET,
            &WINDOW_START,
            $limit,
            CoarsetimeInstant::now,
        ) {
            ::tracing::$log_fn!($($args)*);
        }
    }};
}

#[macro_export]
macro_rules! rate_limited_debug {
    ($unit:ident=$limit:literal, $($args:tt)*) => {
        $crate::rate_limited_tracing::rate_limited_tracing!(debug, $unit=$limit, $($args)*)
    };
}

#[macro_export]
macro_rules! rate_limited_warn {
    ($unit:ident=$limit:literal, $($args:tt)*) => {
        $crate::rate_limited_tracing::rate_limited_tracing!(warn, $unit=$limit, $($args)*)
    };
}

#[doc(hidden)]
pub use coarsetime::Instant as CoarsetimeInstant;
#[doc(hidden)]
pub use rate_limited_tracing;
pub use {rate_limited_debug, rate_limited_warn};
