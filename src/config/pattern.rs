// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::Deserialize;

use super::ConfigError;
use crate::pattern::Pattern;

/// A YAML representation of a pattern.
#[derive(Deserialize, Clone)]
pub struct PatternConfig {
    /// The name of the pattern. Defaults to the file stem when loaded
    /// from a file.
    name: Option<String>,

    /// Step rows keyed by instrument id, written in `x...` notation.
    /// Rows shorter than the full cycle repeat to fill it.
    steps: HashMap<String, String>,
}

impl PatternConfig {
    /// Parses a pattern from a YAML file.
    pub fn load(path: &Path) -> Result<PatternConfig, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let mut config: PatternConfig =
            serde_yml::from_str(&contents).map_err(|e| ConfigError::Parse {
                path: path.to_path_buf(),
                source: e,
            })?;
        if config.name.is_none() {
            config.name = path
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned());
        }
        Ok(config)
    }

    /// The name of the pattern.
    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or("pattern")
    }

    /// Converts the parsed notation into a playable pattern.
    pub fn to_pattern(&self) -> Result<Pattern, ConfigError> {
        let mut pattern = Pattern::new(self.name());
        let mut instruments: Vec<&String> = self.steps.keys().collect();
        instruments.sort();
        for instrument in instruments {
            pattern.add_row(instrument, &self.steps[instrument])?;
        }
        Ok(pattern)
    }
}
