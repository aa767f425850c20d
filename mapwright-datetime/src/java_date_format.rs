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

use std::str::FromStr;

use time::format_description::{self, BorrowedFormatItem};
use time::parsing::Parsed;
use time::{OffsetDateTime, PrimitiveDateTime};

/// A Java `DateTimeFormatter` style pattern such as `yyyy/MM/dd HH:mm:ss`.
///
/// The pattern is translated once into a `time` format description, which is re-parsed into
/// format items on each use.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct JavaDatePattern {
    pattern: String,
    description: String,
    with_offset: bool,
}

impl JavaDatePattern {
    pub fn as_str(&self) -> &str {
        &self.pattern
    }

    fn items(&self) -> Result<Vec<BorrowedFormatItem<'_>>, String> {
        format_description::parse_borrowed::<1>(&self.description)
            .map_err(|error| error.to_string())
    }

    pub fn parse_date_time(&self, date_time_str: &str) -> Result<OffsetDateTime, String> {
        let items = self.items()?;
        let mut parsed = Parsed::new();
        let remaining = parsed
            .parse_items(date_time_str.as_bytes(), &items)
            .map_err(|error| error.to_string())?;
        if !remaining.is_empty() {
            return Err(format!(
                "datetime string `{date_time_str}` does not match pattern `{}`",
                self.pattern
            ));
        }
        // Patterns without a time component resolve to midnight.
        if parsed.hour_24().is_none()
            && !(parsed.hour_12().is_some() && parsed.hour_12_is_pm().is_some())
        {
            parsed.set_hour_24(0u8);
        }
        if parsed.minute().is_none() {
            parsed.set_minute(0u8);
        }
        if parsed.second().is_none() {
            parsed.set_second(0u8);
        }
        if self.with_offset {
            OffsetDateTime::try_from(parsed).map_err(|error| error.to_string())
        } else {
            PrimitiveDateTime::try_from(parsed)
                .map(|date_time| date_time.assume_utc())
                .map_err(|error| error.to_string())
        }
    }

    pub fn format_date_time(&self, date_time: OffsetDateTime) -> Result<String, String> {
        let items = self.items()?;
        date_time
            .format(items.as_slice())
            .map_err(|error| error.to_string())
    }
}

impl FromStr for JavaDatePattern {
    type Err = String;

    fn from_str(pattern: &str) -> Result<Self, Self::Err> {
        let (description, with_offset) = java_pattern_to_description(pattern)?;
        format_description::parse_borrowed::<1>(&description)
            .map_err(|error| format!("invalid date format `{pattern}`: {error}"))?;
        Ok(JavaDatePattern {
            pattern: pattern.to_string(),
            description,
            with_offset,
        })
    }
}

fn component(letter: char, width: usize, pattern: &str) -> Result<(&'static str, bool), String> {
    let component = match (letter, width) {
        ('y' | 'u', 2) => "[year repr:last_two]",
        ('y' | 'u', _) => "[year]",
        ('M', 1) => "[month padding:none]",
        ('M', 2) => "[month]",
        ('M', 3) => "[month repr:short]",
        ('M', _) => "[month repr:long]",
        ('d', 1) => "[day padding:none]",
        ('d', _) => "[day]",
        ('D', _) => "[ordinal]",
        ('H', 1) => "[hour padding:none]",
        ('H', _) => "[hour]",
        ('h', 1) => "[hour repr:12 padding:none]",
        ('h', _) => "[hour repr:12]",
        ('m', 1) => "[minute padding:none]",
        ('m', _) => "[minute]",
        ('s', 1) => "[second padding:none]",
        ('s', _) => "[second]",
        ('S', 1) => "[subsecond digits:1]",
        ('S', 2) => "[subsecond digits:2]",
        ('S', 3) => "[subsecond digits:3]",
        ('S', 4..=6) => "[subsecond digits:6]",
        ('S', _) => "[subsecond digits:9]",
        ('a', _) => "[period]",
        ('E', 1..=3) => "[weekday repr:short]",
        ('E', _) => "[weekday]",
        ('X' | 'x', 3) => return Ok(("[offset_hour sign:mandatory]:[offset_minute]", true)),
        ('X' | 'x' | 'Z', _) => return Ok(("[offset_hour sign:mandatory][offset_minute]", true)),
        _ => {
            return Err(format!(
                "unsupported pattern letter `{letter}` in date format `{pattern}`"
            ))
        }
    };
    Ok((component, false))
}

fn push_literal(description: &mut String, character: char) {
    if character == '[' {
        description.push_str("[[");
    } else {
        description.push(character);
    }
}

/// Translates a Java date pattern into a `time` format description. Also returns whether the
/// pattern carries an offset.
fn java_pattern_to_description(pattern: &str) -> Result<(String, bool), String> {
    let chars: Vec<char> = pattern.chars().collect();
    let mut description = String::with_capacity(pattern.len() * 4);
    let mut with_offset = false;
    let mut index = 0;
    while index < chars.len() {
        let current = chars[index];
        if current == '\'' {
            index += 1;
            if chars.get(index) == Some(&'\'') {
                description.push('\'');
                index += 1;
                continue;
            }
            loop {
                match chars.get(index) {
                    None => return Err(format!("unterminated quote in date format `{pattern}`")),
                    Some('\'') if chars.get(index + 1) == Some(&'\'') => {
                        description.push('\'');
                        index += 2;
                    }
                    Some('\'') => {
                        index += 1;
                        break;
                    }
                    Some(&literal) => {
                        push_literal(&mut description, literal);
                        index += 1;
                    }
                }
            }
            continue;
        }
        if !current.is_ascii_alphabetic() {
            push_literal(&mut description, current);
            index += 1;
            continue;
        }
        let mut width = 1;
        while chars.get(index + width) == Some(&current) {
            width += 1;
        }
        let (component, is_offset) = component(current, width, pattern)?;
        with_offset |= is_offset;
        description.push_str(component);
        index += width;
    }
    Ok((description, with_offset))
}
