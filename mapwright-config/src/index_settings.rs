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

use anyhow::ensure;
use mapwright_common::{get_from_env, true_fn};
use serde::{Deserialize, Serialize};

/// A single ceiling such as `mapping.total_fields.limit`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Limit {
    pub limit: u64,
}

impl Limit {
    const fn new(limit: u64) -> Limit {
        Limit { limit }
    }
}

fn default_total_fields() -> Limit {
    Limit::new(1_000)
}

fn default_depth() -> Limit {
    Limit::new(20)
}

fn default_field_name_length() -> Limit {
    Limit::new(u64::MAX)
}

fn default_nested_fields() -> Limit {
    Limit::new(50)
}

fn default_nested_objects() -> Limit {
    Limit::new(10_000)
}

/// `index.mapping.*` settings.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MappingSettings {
    #[serde(default = "default_total_fields")]
    pub total_fields: Limit,
    #[serde(default = "default_depth")]
    pub depth: Limit,
    #[serde(default = "default_field_name_length")]
    pub field_name_length: Limit,
    #[serde(default = "default_nested_fields")]
    pub nested_fields: Limit,
    #[serde(default = "default_nested_objects")]
    pub nested_objects: Limit,
    /// Default of the `coerce` field parameter.
    #[serde(default = "true_fn")]
    pub coerce: bool,
    /// Default of the `ignore_malformed` field parameter.
    #[serde(default)]
    pub ignore_malformed: bool,
}

impl Default for MappingSettings {
    fn default() -> Self {
        MappingSettings {
            total_fields: default_total_fields(),
            depth: default_depth(),
            field_name_length: default_field_name_length(),
            nested_fields: default_nested_fields(),
            nested_objects: default_nested_objects(),
            coerce: true,
            ignore_malformed: false,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SearchSettings {
    #[serde(default = "true_fn")]
    pub allow_expensive_queries: bool,
}

impl Default for SearchSettings {
    fn default() -> Self {
        SearchSettings {
            allow_expensive_queries: true,
        }
    }
}

/// Per index settings consumed by the mapping engine.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IndexSettings {
    #[serde(default)]
    pub mapping: MappingSettings,
    #[serde(default)]
    pub search: SearchSettings,
}

impl IndexSettings {
    pub fn validate(&self) -> anyhow::Result<()> {
        let limits = [
            ("mapping.total_fields.limit", self.mapping.total_fields),
            ("mapping.depth.limit", self.mapping.depth),
            ("mapping.field_name_length.limit", self.mapping.field_name_length),
        ];
        for (setting_name, limit) in limits {
            ensure!(
                limit.limit >= 1,
                "failed to validate index settings: `{setting_name}` must be at least 1, got \
                 `{}`",
                limit.limit
            );
        }
        Ok(())
    }

    /// Lets `MAPWRIGHT_MAPPING_COERCE` and `MAPWRIGHT_MAPPING_IGNORE_MALFORMED` override the
    /// index wide field parameter defaults.
    pub fn with_env_overrides(mut self) -> Self {
        self.mapping.coerce = get_from_env("MAPWRIGHT_MAPPING_COERCE", self.mapping.coerce);
        self.mapping.ignore_malformed = get_from_env(
            "MAPWRIGHT_MAPPING_IGNORE_MALFORMED",
            self.mapping.ignore_malformed,
        );
        self
    }

    pub fn total_fields_limit(&self) -> u64 {
        self.mapping.total_fields.limit
    }

    pub fn depth_limit(&self) -> u64 {
        self.mapping.depth.limit
    }

    pub fn field_name_length_limit(&self) -> u64 {
        self.mapping.field_name_length.limit
    }

    pub fn nested_fields_limit(&self) -> u64 {
        self.mapping.nested_fields.limit
    }

    pub fn nested_objects_limit(&self) -> u64 {
        self.mapping.nested_objects.limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_settings_defaults() {
        let settings: IndexSettings = serde_json::from_str("{}").unwrap();
        assert_eq!(settings, IndexSettings::default());
        assert_eq!(settings.total_fields_limit(), 1_000);
        assert_eq!(settings.depth_limit(), 20);
        assert_eq!(settings.field_name_length_limit(), u64::MAX);
        assert_eq!(settings.nested_fields_limit(), 50);
        assert_eq!(settings.nested_objects_limit(), 10_000);
        assert!(settings.mapping.coerce);
        assert!(!settings.mapping.ignore_malformed);
        assert!(settings.search.allow_expensive_queries);
    }

    #[test]
    fn test_index_settings_partial() {
        let settings: IndexSettings = serde_json::from_str(
            r#"{"mapping": {"depth": {"limit": 3}, "ignore_malformed": true}}"#,
        )
        .unwrap();
        assert_eq!(settings.depth_limit(), 3);
        assert_eq!(settings.total_fields_limit(), 1_000);
        assert!(settings.mapping.ignore_malformed);
    }

    #[test]
    fn test_index_settings_rejects_unknown_fields() {
        let error = serde_json::from_str::<IndexSettings>(r#"{"mapping": {"dept": {"limit": 3}}}"#)
            .unwrap_err();
        assert!(error.to_string().contains("unknown field `dept`"));
    }

    #[test]
    fn test_index_settings_validate() {
        let mut settings = IndexSettings::default();
        settings.validate().unwrap();
        settings.mapping.depth.limit = 0;
        let error = settings.validate().unwrap_err();
        assert!(error.to_string().contains("mapping.depth.limit"));
    }
}
