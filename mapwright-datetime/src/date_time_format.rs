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

use std::fmt::Display;
use std::str::FromStr;

use itertools::Itertools;
use serde::de::Error;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use time::{Date, Month, OffsetDateTime, PrimitiveDateTime, Time, UtcOffset};

use crate::java_date_format::JavaDatePattern;
use crate::DateResolution;

/// A single date format, as accepted in a `format` parameter.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub enum DateFormat {
    /// `yyyy[-MM[-dd]]['T'HH[:mm[:ss[.S]]][offset]]` with fixed width components.
    StrictDateOptionalTime,
    /// Same shape as the strict variant but month, day and time components may have one digit.
    DateOptionalTime,
    /// `yyyy-MM-dd`.
    StrictDate,
    EpochMillis,
    EpochSecond,
    Pattern(JavaDatePattern),
}

impl DateFormat {
    pub fn as_str(&self) -> &str {
        match self {
            DateFormat::StrictDateOptionalTime => "strict_date_optional_time",
            DateFormat::DateOptionalTime => "date_optional_time",
            DateFormat::StrictDate => "strict_date",
            DateFormat::EpochMillis => "epoch_millis",
            DateFormat::EpochSecond => "epoch_second",
            DateFormat::Pattern(pattern) => pattern.as_str(),
        }
    }

    pub fn parse_date_time(&self, date_time_str: &str) -> Result<OffsetDateTime, String> {
        match self {
            DateFormat::StrictDateOptionalTime => parse_date_optional_time(date_time_str, true),
            DateFormat::DateOptionalTime => parse_date_optional_time(date_time_str, false),
            DateFormat::StrictDate => {
                let date_time = parse_date_optional_time(date_time_str, true)?;
                if date_time_str.len() != 10 {
                    return Err(format!("`{date_time_str}` is not a `yyyy-MM-dd` date"));
                }
                Ok(date_time)
            }
            DateFormat::EpochMillis => parse_epoch(date_time_str, 1_000_000),
            DateFormat::EpochSecond => parse_epoch(date_time_str, 1_000_000_000),
            DateFormat::Pattern(pattern) => pattern.parse_date_time(date_time_str),
        }
    }

    pub fn format_date_time(
        &self,
        date_time: OffsetDateTime,
        resolution: DateResolution,
    ) -> Result<String, String> {
        match self {
            DateFormat::StrictDateOptionalTime
            | DateFormat::DateOptionalTime
            | DateFormat::StrictDate => Ok(format_iso8601(date_time, resolution)),
            DateFormat::EpochMillis => {
                let nanos = date_time.unix_timestamp_nanos();
                let millis = nanos.div_euclid(1_000_000);
                let remainder = nanos.rem_euclid(1_000_000);
                if remainder == 0 {
                    Ok(millis.to_string())
                } else {
                    Ok(format!("{millis}.{remainder:06}"))
                }
            }
            DateFormat::EpochSecond => Ok(date_time.unix_timestamp().to_string()),
            DateFormat::Pattern(pattern) => pattern.format_date_time(date_time),
        }
    }
}

impl FromStr for DateFormat {
    type Err = String;

    fn from_str(date_format_str: &str) -> Result<Self, Self::Err> {
        let date_format = match date_format_str {
            "strict_date_optional_time" => DateFormat::StrictDateOptionalTime,
            "date_optional_time" => DateFormat::DateOptionalTime,
            "strict_date" | "date" => DateFormat::StrictDate,
            "epoch_millis" => DateFormat::EpochMillis,
            "epoch_second" => DateFormat::EpochSecond,
            _ => DateFormat::Pattern(JavaDatePattern::from_str(date_format_str)?),
        };
        Ok(date_format)
    }
}

/// A `||` separated list of date formats. Parsing tries each format in turn, formatting always
/// uses the first one.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct DateFormatter {
    pattern: String,
    formats: Vec<DateFormat>,
}

impl DateFormatter {
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn formats(&self) -> &[DateFormat] {
        &self.formats
    }

    pub fn parse(&self, date_time_str: &str) -> Result<OffsetDateTime, String> {
        for format in &self.formats {
            if let Ok(date_time) = format.parse_date_time(date_time_str) {
                return Ok(date_time);
            }
        }
        Err(format!(
            "failed to parse date field [{date_time_str}] with format [{}]",
            self.pattern
        ))
    }

    pub fn format(&self, date_time: OffsetDateTime, resolution: DateResolution) -> String {
        self.formats
            .first()
            .and_then(|format| format.format_date_time(date_time, resolution).ok())
            .unwrap_or_else(|| format_iso8601(date_time, resolution))
    }
}

impl Default for DateFormatter {
    fn default() -> Self {
        DateFormatter {
            pattern: crate::DEFAULT_DATE_FORMAT.to_string(),
            formats: vec![DateFormat::StrictDateOptionalTime, DateFormat::EpochMillis],
        }
    }
}

impl Display for DateFormatter {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(&self.pattern)
    }
}

impl FromStr for DateFormatter {
    type Err = String;

    fn from_str(pattern: &str) -> Result<Self, Self::Err> {
        if pattern.trim().is_empty() {
            return Err("date format cannot be empty".to_string());
        }
        let formats: Vec<DateFormat> = pattern
            .split("||")
            .map(DateFormat::from_str)
            .try_collect()?;
        Ok(DateFormatter {
            pattern: pattern.to_string(),
            formats,
        })
    }
}

impl Serialize for DateFormatter {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where S: Serializer {
        serializer.serialize_str(&self.pattern)
    }
}

impl<'de> Deserialize<'de> for DateFormatter {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where D: Deserializer<'de> {
        let pattern: String = Deserialize::deserialize(deserializer)?;
        DateFormatter::from_str(&pattern).map_err(D::Error::custom)
    }
}

fn format_iso8601(date_time: OffsetDateTime, resolution: DateResolution) -> String {
    let date_time = date_time.to_offset(UtcOffset::UTC);
    let fraction = match resolution {
        DateResolution::Milliseconds => format!("{:03}", date_time.millisecond()),
        DateResolution::Nanoseconds => format!("{:09}", date_time.nanosecond()),
    };
    format!(
        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}.{fraction}Z",
        date_time.year(),
        date_time.month() as u8,
        date_time.day(),
        date_time.hour(),
        date_time.minute(),
        date_time.second(),
    )
}

fn parse_epoch(epoch_str: &str, nanos_per_unit: i128) -> Result<OffsetDateTime, String> {
    let (integer_part, fraction_part) = match epoch_str.split_once('.') {
        Some((integer_part, fraction_part)) => (integer_part, fraction_part),
        None => (epoch_str, ""),
    };
    let integer: i128 = integer_part
        .parse::<i64>()
        .map_err(|_| format!("`{epoch_str}` is not a valid epoch timestamp"))?
        .into();
    let mut nanos = integer * nanos_per_unit;
    if !fraction_part.is_empty() {
        if !fraction_part.bytes().all(|byte| byte.is_ascii_digit()) || fraction_part.len() > 9 {
            return Err(format!("`{epoch_str}` is not a valid epoch timestamp"));
        }
        let fraction_nanos: i128 = fraction_part
            .parse::<i128>()
            .map_err(|_| format!("`{epoch_str}` is not a valid epoch timestamp"))?
            * nanos_per_unit
            / 10i128.pow(fraction_part.len() as u32);
        if integer_part.starts_with('-') {
            nanos -= fraction_nanos;
        } else {
            nanos += fraction_nanos;
        }
    }
    OffsetDateTime::from_unix_timestamp_nanos(nanos).map_err(|error| error.to_string())
}

struct Cursor<'a> {
    input: &'a [u8],
    position: usize,
}

impl<'a> Cursor<'a> {
    fn peek(&self) -> Option<u8> {
        self.input.get(self.position).copied()
    }

    fn eat(&mut self, byte: u8) -> bool {
        if self.peek() == Some(byte) {
            self.position += 1;
            true
        } else {
            false
        }
    }

    fn digits(&mut self, min: usize, max: usize) -> Option<(u32, usize)> {
        let start = self.position;
        let mut value: u32 = 0;
        while self.position - start < max {
            match self.peek() {
                Some(byte) if byte.is_ascii_digit() => {
                    value = value * 10 + (byte - b'0') as u32;
                    self.position += 1;
                }
                _ => break,
            }
        }
        let num_digits = self.position - start;
        if num_digits < min {
            self.position = start;
            return None;
        }
        Some((value, num_digits))
    }

    fn is_done(&self) -> bool {
        self.position == self.input.len()
    }
}

fn parse_date_optional_time(date_time_str: &str, strict: bool) -> Result<OffsetDateTime, String> {
    let invalid = || format!("`{date_time_str}` is not a valid date");
    let two_digits_min = if strict { 2 } else { 1 };
    let mut cursor = Cursor {
        input: date_time_str.as_bytes(),
        position: 0,
    };
    let negative_year = cursor.eat(b'-');
    let (year, _) = if strict {
        cursor.digits(4, 4)
    } else {
        cursor.digits(1, 9)
    }
    .ok_or_else(invalid)?;
    let year = if negative_year {
        -(year as i32)
    } else {
        year as i32
    };
    let mut month = 1;
    let mut day = 1;
    if cursor.eat(b'-') {
        month = cursor.digits(two_digits_min, 2).ok_or_else(invalid)?.0 as u8;
        if cursor.eat(b'-') {
            day = cursor.digits(two_digits_min, 2).ok_or_else(invalid)?.0 as u8;
        }
    }
    let month = Month::try_from(month).map_err(|error| error.to_string())?;
    let date = Date::from_calendar_date(year, month, day).map_err(|error| error.to_string())?;

    let mut time = Time::MIDNIGHT;
    let mut offset = UtcOffset::UTC;
    if cursor.eat(b'T') {
        let hour = cursor.digits(two_digits_min, 2).ok_or_else(invalid)?.0 as u8;
        let mut minute = 0;
        let mut second = 0;
        let mut nanosecond = 0;
        if cursor.eat(b':') {
            minute = cursor.digits(two_digits_min, 2).ok_or_else(invalid)?.0 as u8;
            if cursor.eat(b':') {
                second = cursor.digits(two_digits_min, 2).ok_or_else(invalid)?.0 as u8;
                if cursor.eat(b'.') || cursor.eat(b',') {
                    let (fraction, num_digits) = cursor.digits(1, 9).ok_or_else(invalid)?;
                    nanosecond = fraction * 10u32.pow(9 - num_digits as u32);
                }
            }
        }
        time = Time::from_hms_nano(hour, minute, second, nanosecond)
            .map_err(|error| error.to_string())?;
        offset = parse_offset(&mut cursor).ok_or_else(invalid)?;
    }
    if !cursor.is_done() {
        return Err(invalid());
    }
    Ok(PrimitiveDateTime::new(date, time)
        .assume_offset(offset)
        .to_offset(UtcOffset::UTC))
}

fn parse_offset(cursor: &mut Cursor) -> Option<UtcOffset> {
    if cursor.is_done() || cursor.eat(b'Z') {
        return Some(UtcOffset::UTC);
    }
    let sign: i8 = if cursor.eat(b'+') {
        1
    } else if cursor.eat(b'-') {
        -1
    } else {
        return None;
    };
    let hours = cursor.digits(2, 2)?.0 as i8;
    cursor.eat(b':');
    let minutes = cursor.digits(2, 2).map(|(minutes, _)| minutes as i8).unwrap_or(0);
    UtcOffset::from_hms(sign * hours, sign * minutes, 0).ok()
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;

    #[test]
    fn test_parse_strict_date_optional_time() {
        let format = DateFormat::StrictDateOptionalTime;
        assert_eq!(
            format.parse_date_time("2020-12-15").unwrap(),
            datetime!(2020-12-15 00:00:00 UTC)
        );
        assert_eq!(
            format.parse_date_time("2020-12-15T10:11:12.345Z").unwrap(),
            datetime!(2020-12-15 10:11:12.345 UTC)
        );
        assert_eq!(
            format.parse_date_time("2020-12-15T10:11:12+02:00").unwrap(),
            datetime!(2020-12-15 08:11:12 UTC)
        );
        assert_eq!(
            format.parse_date_time("2020-12").unwrap(),
            datetime!(2020-12-01 00:00:00 UTC)
        );
        assert_eq!(
            format.parse_date_time("2020-12-15T10:11").unwrap(),
            datetime!(2020-12-15 10:11:00 UTC)
        );
        format.parse_date_time("2020-1-15").unwrap_err();
        format.parse_date_time("2020-12-15 10:11:12").unwrap_err();
        format.parse_date_time("2020-13-15").unwrap_err();
        format.parse_date_time("hello").unwrap_err();
        format.parse_date_time("1").unwrap_err();
    }

    #[test]
    fn test_parse_lenient_date_optional_time() {
        let format = DateFormat::DateOptionalTime;
        assert_eq!(
            format.parse_date_time("2020-1-5T1:2").unwrap(),
            datetime!(2020-01-05 01:02:00 UTC)
        );
    }

    #[test]
    fn test_parse_epoch() {
        assert_eq!(
            DateFormat::EpochMillis.parse_date_time("1607990400123").unwrap(),
            datetime!(2020-12-15 00:00:00.123 UTC)
        );
        assert_eq!(
            DateFormat::EpochMillis.parse_date_time("1.5").unwrap(),
            datetime!(1970-01-01 00:00:00.0015 UTC)
        );
        assert_eq!(
            DateFormat::EpochMillis.parse_date_time("-1").unwrap(),
            datetime!(1969-12-31 23:59:59.999 UTC)
        );
        assert_eq!(
            DateFormat::EpochSecond.parse_date_time("1607990400").unwrap(),
            datetime!(2020-12-15 00:00:00 UTC)
        );
        DateFormat::EpochMillis.parse_date_time("12a").unwrap_err();
    }

    #[test]
    fn test_date_formatter_alternatives() {
        let formatter = DateFormatter::from_str("strict_date_optional_time||epoch_millis").unwrap();
        assert_eq!(formatter.formats().len(), 2);
        assert_eq!(
            formatter.parse("1607990400000").unwrap(),
            datetime!(2020-12-15 00:00:00 UTC)
        );
        assert_eq!(
            formatter.parse("2020-12-15").unwrap(),
            datetime!(2020-12-15 00:00:00 UTC)
        );
        assert_eq!(
            formatter.parse("not a date").unwrap_err(),
            "failed to parse date field [not a date] with format \
             [strict_date_optional_time||epoch_millis]"
        );
        assert_eq!(formatter, DateFormatter::default());
    }

    #[test]
    fn test_date_formatter_format() {
        let formatter = DateFormatter::default();
        let date_time = datetime!(2020-12-15 10:11:12.123456789 UTC);
        assert_eq!(
            formatter.format(date_time, DateResolution::Milliseconds),
            "2020-12-15T10:11:12.123Z"
        );
        assert_eq!(
            formatter.format(date_time, DateResolution::Nanoseconds),
            "2020-12-15T10:11:12.123456789Z"
        );
        let epoch_formatter = DateFormatter::from_str("epoch_millis").unwrap();
        assert_eq!(
            epoch_formatter.format(
                datetime!(2020-12-15 00:00:00.123 UTC),
                DateResolution::Milliseconds
            ),
            "1607990400123"
        );
    }

    #[test]
    fn test_date_formatter_serde() {
        let formatter: DateFormatter =
            serde_json::from_str(r#""yyyy/MM/dd HH:mm:ss||yyyy/MM/dd""#).unwrap();
        assert_eq!(
            formatter.parse("2020/12/15").unwrap(),
            datetime!(2020-12-15 00:00:00 UTC)
        );
        assert_eq!(
            serde_json::to_string(&formatter).unwrap(),
            r#""yyyy/MM/dd HH:mm:ss||yyyy/MM/dd""#
        );
        serde_json::from_str::<DateFormatter>(r#""""#).unwrap_err();
    }
}
