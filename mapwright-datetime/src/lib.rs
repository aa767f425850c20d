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

mod date_resolution;
mod date_time_format;
mod java_date_format;

pub use date_resolution::DateResolution;
pub use date_time_format::{DateFormat, DateFormatter};
pub use java_date_format::JavaDatePattern;
pub use time::OffsetDateTime;

/// Format used by date fields when the mapping does not declare one.
pub const DEFAULT_DATE_FORMAT: &str = "strict_date_optional_time||epoch_millis";

/// Formats tried, in order, when a dynamic string value may be a date.
pub const DEFAULT_DYNAMIC_DATE_FORMATS: [&str; 2] = [
    "strict_date_optional_time",
    "yyyy/MM/dd HH:mm:ss||yyyy/MM/dd",
];
