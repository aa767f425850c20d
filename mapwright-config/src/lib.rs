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

mod index_settings;

use std::path::Path;
use std::str::FromStr;

use anyhow::{bail, Context};
use json_comments::StripComments;
use serde::de::DeserializeOwned;
use tracing::info;

pub use crate::index_settings::{IndexSettings, Limit, MappingSettings, SearchSettings};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ConfigFormat {
    Json,
    Toml,
    Yaml,
}

impl ConfigFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigFormat::Json => "json",
            ConfigFormat::Toml => "toml",
            ConfigFormat::Yaml => "yaml",
        }
    }

    pub fn sniff_from_path(path: &Path) -> anyhow::Result<ConfigFormat> {
        let extension_str: &str = path
            .extension()
            .and_then(|extension| extension.to_str())
            .with_context(|| {
                format!(
                    "failed to read config file `{}`: file extension is missing. Supported file \
                     formats and extensions are JSON (.json), TOML (.toml), and YAML (.yaml or \
                     .yml)",
                    path.display()
                )
            })?;
        ConfigFormat::from_str(extension_str)
            .with_context(|| format!("failed to identify config file format `{}`", path.display()))
    }

    pub fn parse<T>(&self, payload: &[u8]) -> anyhow::Result<T>
    where T: DeserializeOwned {
        match self {
            ConfigFormat::Json => {
                serde_json::from_reader(StripComments::new(payload))
                    .context("failed to read JSON file")
            }
            ConfigFormat::Toml => {
                let payload_str = std::str::from_utf8(payload)
                    .context("configuration file contains invalid UTF-8 characters")?;
                toml::from_str(payload_str).context("failed to read TOML file")
            }
            ConfigFormat::Yaml => {
                serde_yaml::from_slice(payload).context("failed to read YAML file")
            }
        }
    }
}

impl FromStr for ConfigFormat {
    type Err = anyhow::Error;

    fn from_str(ext: &str) -> anyhow::Result<Self> {
        match ext {
            "json" => Ok(Self::Json),
            "toml" => Ok(Self::Toml),
            "yaml" | "yml" => Ok(Self::Yaml),
            _ => bail!(
                "file extension `.{ext}` is not supported. Supported file formats and extensions \
                 are JSON (.json), TOML (.toml), and YAML (.yaml or .yml)",
            ),
        }
    }
}

/// Parses and validates index settings.
pub fn load_index_settings(
    payload: &[u8],
    config_format: ConfigFormat,
) -> anyhow::Result<IndexSettings> {
    let index_settings: IndexSettings = config_format.parse(payload)?;
    index_settings.validate()?;
    Ok(index_settings)
}

/// Reads index settings from a `.json`, `.toml`, `.yaml` or `.yml` file.
pub fn load_index_settings_from_file(path: &Path) -> anyhow::Result<IndexSettings> {
    let config_format = ConfigFormat::sniff_from_path(path)?;
    let payload = std::fs::read(path)
        .with_context(|| format!("failed to read config file `{}`", path.display()))?;
    let index_settings = load_index_settings(&payload, config_format)?;
    info!(path=%path.display(), format=config_format.as_str(), "loaded index settings");
    Ok(index_settings)
}
