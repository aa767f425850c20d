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

use time::OffsetDateTime;

const NANOS_PER_MILLI: i128 = 1_000_000;

/// Precision at which a date field stores its values.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum DateResolution {
    Milliseconds,
    Nanoseconds,
}

impl DateResolution {
    /// Name of the field type backed by this resolution.
    pub fn type_name(&self) -> &'static str {
        match self {
            DateResolution::Milliseconds => "date",
            DateResolution::Nanoseconds => "date_nanos",
        }
    }

    /// Converts a date to the long stored in the index.
    pub fn convert(&self, date_time: OffsetDateTime) -> Result<i64, String> {
        let nanos = date_time.unix_timestamp_nanos();
        match self {
            DateResolution::Milliseconds => {
                i64::try_from(nanos.div_euclid(NANOS_PER_MILLI)).map_err(|_| {
                    format!("date[{date_time}] is out of range for millisecond resolution")
                })
            }
            DateResolution::Nanoseconds => {
                if nanos < 0 {
                    return Err(format!(
                        "date[{date_time}] is before the epoch in 1970 and cannot be stored in \
                         nanosecond resolution"
                    ));
                }
                i64::try_from(nanos).map_err(|_| {
                    format!(
                        "date[{date_time}] is after 2262-04-11T23:47:16.854775807 and cannot be \
                         stored in nanosecond resolution"
                    )
                })
            }
        }
    }

    /// Converts a stored long back to a date.
    pub fn to_date_time(&self, value: i64) -> Result<OffsetDateTime, String> {
        let nanos = match self {
            DateResolution::Milliseconds => value as i128 * NANOS_PER_MILLI,
            DateResolution::Nanoseconds => value as i128,
        };
        OffsetDateTime::from_unix_timestamp_nanos(nanos).map_err(|error| error.to_string())
    }

    /// Converts a millisecond timestamp to this resolution, clamping on overflow.
    pub fn from_millis(&self, millis: i64) -> i64 {
        match self {
            DateResolution::Milliseconds => millis,
            DateResolution::Nanoseconds => millis.saturating_mul(NANOS_PER_MILLI as i64),
        }
    }
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;

    #[test]
    fn test_convert_milliseconds() {
        let resolution = DateResolution::Milliseconds;
        assert_eq!(
            resolution.convert(datetime!(2020-12-15 00:00:00.123 UTC)).unwrap(),
            1_607_990_400_123
        );
        assert_eq!(
            resolution.convert(datetime!(1969-12-31 23:59:59.9995 UTC)).unwrap(),
            -1
        );
        assert_eq!(
            resolution.to_date_time(1_607_990_400_123).unwrap(),
            datetime!(2020-12-15 00:00:00.123 UTC)
        );
    }

    #[test]
    fn test_convert_nanoseconds() {
        let resolution = DateResolution::Nanoseconds;
        assert_eq!(
            resolution.convert(datetime!(1970-01-01 00:00:00.000000042 UTC)).unwrap(),
            42
        );
        let error = resolution
            .convert(datetime!(1969-12-31 00:00:00 UTC))
            .unwrap_err();
        assert!(error.contains("before the epoch"));
        let error = resolution
            .convert(datetime!(2300-01-01 00:00:00 UTC))
            .unwrap_err();
        assert!(error.contains("after 2262-04-11"));
        assert_eq!(resolution.from_millis(3), 3_000_000);
        assert_eq!(resolution.from_millis(i64::MAX), i64::MAX);
    }
}
