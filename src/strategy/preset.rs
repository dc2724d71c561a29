//! Named multicast scan configurations kept in a JSON file.
//!
//! ```json
//! {
//!   "presets": [
//!     {
//!       "id": "beijing-unicom",
//!       "name": "Beijing Unicom",
//!       "protocol": "rtp",
//!       "ip_ranges": ["239.3.1.1-239.3.1.255"],
//!       "ports": [8000, 8004, 8008]
//!     }
//!   ]
//! }
//! ```
use std::fs;
use std::path::{Path, PathBuf};

use log::debug;
use serde_derive::Deserialize;

use super::MulticastStrategy;
use crate::errors::ScanError;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ScanPreset {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub protocol: String,
    #[serde(default)]
    pub ip_ranges: Vec<String>,
    #[serde(default)]
    pub ports: Vec<u16>,
    #[serde(default)]
    pub estimated_targets: Option<u64>,
    #[serde(default)]
    pub estimated_duration: Option<String>,
    #[serde(default)]
    pub reference: Option<String>,
}

impl ScanPreset {
    /// Builds the multicast strategy described by this preset.
    pub fn to_strategy(&self) -> Result<MulticastStrategy, ScanError> {
        MulticastStrategy::new(&self.protocol, &self.ip_ranges, &self.ports)
    }
}

#[derive(Debug, Deserialize)]
struct PresetFile {
    #[serde(default)]
    presets: Vec<ScanPreset>,
}

/// Reads presets from a file on every call, so edits are picked up without
/// restarting.
#[derive(Debug, Clone)]
pub struct PresetLoader {
    path: PathBuf,
}

impl PresetLoader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load_all(&self) -> Result<Vec<ScanPreset>, ScanError> {
        let raw = fs::read_to_string(&self.path).map_err(|source| ScanError::PresetIo {
            path: self.path.clone(),
            source,
        })?;
        let presets = Self::parse(&raw)?;
        debug!("Loaded {} presets from {}", presets.len(), self.path.display());
        Ok(presets)
    }

    pub fn get_by_id(&self, id: &str) -> Result<ScanPreset, ScanError> {
        self.load_all()?
            .into_iter()
            .find(|preset| preset.id == id)
            .ok_or_else(|| ScanError::PresetNotFound(id.to_owned()))
    }

    /// Parses the contents of a preset file.
    pub fn parse(raw: &str) -> Result<Vec<ScanPreset>, ScanError> {
        let file: PresetFile = serde_json::from_str(raw)?;
        Ok(file.presets)
    }
}
