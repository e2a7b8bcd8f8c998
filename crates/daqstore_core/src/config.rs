//! Dataset configuration.

use crate::error::{DatasetError, DatasetResult};
use crate::names::{ResolverPlugin, DEFAULT_UNIDENTIFIED_LABEL};
use crate::types::FragmentType;
use serde::{Deserialize, Deserializer};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Row width used when none is configured.
pub const DEFAULT_WORDS_PER_ROW: usize = 10_240;

/// Table growth granularity used when none is configured.
pub const DEFAULT_CHUNK_ROWS: usize = 128;

/// Chunk size substituted for a configured size of 0.
const FALLBACK_CHUNK_ROWS: usize = 10;

/// Whether a dataset is written or read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DatasetMode {
    /// Producer side; the file is created or truncated.
    #[default]
    Write,
    /// Consumer side; the file must exist.
    Read,
}

impl DatasetMode {
    /// Interprets a mode string: anything containing `rite` writes,
    /// everything else reads.
    #[must_use]
    pub fn from_mode_string(mode: &str) -> Self {
        if mode.contains("rite") {
            Self::Write
        } else {
            Self::Read
        }
    }

    /// Lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Write => "write",
            Self::Read => "read",
        }
    }
}

impl fmt::Display for DatasetMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for DatasetMode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let mode = String::deserialize(deserializer)?;
        Ok(Self::from_mode_string(&mode))
    }
}

/// Physical layout of a data file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayoutKind {
    /// Flat row-chunked tables.
    #[default]
    Ntuple,
    /// One group per event, one subgroup per type label.
    Grouped,
}

impl LayoutKind {
    /// Code stored in the file header.
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::Ntuple => 1,
            Self::Grouped => 2,
        }
    }

    /// Inverse of [`LayoutKind::code`].
    #[must_use]
    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::Ntuple),
            2 => Some(Self::Grouped),
            _ => None,
        }
    }
}

impl fmt::Display for LayoutKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ntuple => f.write_str("ntuple"),
            Self::Grouped => f.write_str("grouped"),
        }
    }
}

impl FromStr for LayoutKind {
    type Err = DatasetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ntuple" => Ok(Self::Ntuple),
            "grouped" => Ok(Self::Grouped),
            other => Err(DatasetError::invalid_config(format!(
                "unknown layout '{other}', expected ntuple or grouped"
            ))),
        }
    }
}

/// Configuration for opening a fragment dataset.
///
/// Loadable from JSON; every field except `file_name` has a default.
///
/// ```
/// use daqstore_core::{DatasetConfig, DatasetMode, LayoutKind};
///
/// let config = DatasetConfig::new("run42.dqst")
///     .layout(LayoutKind::Grouped)
///     .words_per_row(4);
/// assert_eq!(config.mode, DatasetMode::Write);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatasetConfig {
    /// Write or read.
    pub mode: DatasetMode,

    /// Layout for new files. Readers take the layout from the file.
    pub layout: LayoutKind,

    /// Path of the data file.
    pub file_name: PathBuf,

    /// Row width `W` of the flat layout, in words.
    pub words_per_row: usize,

    /// Rows per table chunk (0 selects a small fallback).
    pub payload_chunk_size: usize,

    /// `(type, label)` overrides applied after the resolver's basic types.
    pub fragment_type_map: Vec<(FragmentType, String)>,

    /// Label for unmapped types.
    pub unidentified_instance_name: String,

    /// Resolver plugin.
    pub name_resolver: ResolverPlugin,

    /// Nested types whose containers always get their own container group.
    pub always_container_types: Vec<FragmentType>,

    /// Nested types whose containers are always unwrapped.
    pub unwrap_container_types: Vec<FragmentType>,

    /// Types written directly into the event group.
    pub event_level_types: Vec<FragmentType>,

    /// Per-type dataset base names.
    pub dataset_base_names: Vec<(FragmentType, String)>,

    /// If set, containers whose nested type is not listed are not written.
    pub fragment_types_of_interest: Option<Vec<FragmentType>>,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            mode: DatasetMode::Write,
            layout: LayoutKind::Ntuple,
            file_name: PathBuf::new(),
            words_per_row: DEFAULT_WORDS_PER_ROW,
            payload_chunk_size: DEFAULT_CHUNK_ROWS,
            fragment_type_map: Vec::new(),
            unidentified_instance_name: DEFAULT_UNIDENTIFIED_LABEL.to_string(),
            name_resolver: ResolverPlugin::System,
            always_container_types: Vec::new(),
            unwrap_container_types: Vec::new(),
            event_level_types: Vec::new(),
            dataset_base_names: Vec::new(),
            fragment_types_of_interest: None,
        }
    }
}

impl DatasetConfig {
    /// Creates a write configuration for `file_name` with defaults.
    #[must_use]
    pub fn new(file_name: impl Into<PathBuf>) -> Self {
        Self {
            file_name: file_name.into(),
            ..Self::default()
        }
    }

    /// Parses a JSON configuration.
    ///
    /// # Errors
    ///
    /// Fails if the JSON does not describe a configuration.
    pub fn from_json_str(json: &str) -> DatasetResult<Self> {
        serde_json::from_str(json)
            .map_err(|err| DatasetError::invalid_config(format!("bad JSON configuration: {err}")))
    }

    /// Reads a JSON configuration file.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be read or parsed.
    pub fn from_json_file(path: &Path) -> DatasetResult<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Sets the mode.
    #[must_use]
    pub fn mode(mut self, mode: DatasetMode) -> Self {
        self.mode = mode;
        self
    }

    /// Sets the mode from a mode string.
    #[must_use]
    pub fn mode_str(self, mode: &str) -> Self {
        self.mode(DatasetMode::from_mode_string(mode))
    }

    /// Sets the layout.
    #[must_use]
    pub fn layout(mut self, layout: LayoutKind) -> Self {
        self.layout = layout;
        self
    }

    /// Sets the file name.
    #[must_use]
    pub fn file_name(mut self, file_name: impl Into<PathBuf>) -> Self {
        self.file_name = file_name.into();
        self
    }

    /// Sets the row width.
    #[must_use]
    pub fn words_per_row(mut self, words: usize) -> Self {
        self.words_per_row = words;
        self
    }

    /// Sets the rows per chunk.
    #[must_use]
    pub fn payload_chunk_size(mut self, rows: usize) -> Self {
        self.payload_chunk_size = rows;
        self
    }

    /// Adds a type label override.
    #[must_use]
    pub fn type_label(mut self, fragment_type: FragmentType, label: impl Into<String>) -> Self {
        self.fragment_type_map.push((fragment_type, label.into()));
        self
    }

    /// Sets the unidentified label.
    #[must_use]
    pub fn unidentified_instance_name(mut self, label: impl Into<String>) -> Self {
        self.unidentified_instance_name = label.into();
        self
    }

    /// Selects the resolver plugin.
    #[must_use]
    pub fn name_resolver(mut self, plugin: ResolverPlugin) -> Self {
        self.name_resolver = plugin;
        self
    }

    /// Always writes containers of this nested type as container groups.
    #[must_use]
    pub fn always_container_type(mut self, nested_type: FragmentType) -> Self {
        self.always_container_types.push(nested_type);
        self
    }

    /// Always unwraps containers of this nested type.
    #[must_use]
    pub fn unwrap_container_type(mut self, nested_type: FragmentType) -> Self {
        self.unwrap_container_types.push(nested_type);
        self
    }

    /// Writes fragments of this type directly into the event group.
    #[must_use]
    pub fn event_level_type(mut self, fragment_type: FragmentType) -> Self {
        self.event_level_types.push(fragment_type);
        self
    }

    /// Sets the dataset base name for a type.
    #[must_use]
    pub fn dataset_base_name(
        mut self,
        fragment_type: FragmentType,
        base: impl Into<String>,
    ) -> Self {
        self.dataset_base_names.push((fragment_type, base.into()));
        self
    }

    /// Restricts containers to the listed nested types.
    #[must_use]
    pub fn fragment_types_of_interest(mut self, types: Vec<FragmentType>) -> Self {
        self.fragment_types_of_interest = Some(types);
        self
    }

    /// Rows per table chunk after substituting the fallback for 0.
    #[must_use]
    pub fn chunk_rows(&self) -> usize {
        if self.payload_chunk_size == 0 {
            FALLBACK_CHUNK_ROWS
        } else {
            self.payload_chunk_size
        }
    }

    /// Base name configured for a type, if any.
    #[must_use]
    pub fn base_name_for(&self, fragment_type: FragmentType) -> Option<&str> {
        self.dataset_base_names
            .iter()
            .rev()
            .find(|(code, _)| *code == fragment_type)
            .map(|(_, base)| base.as_str())
    }

    /// Checks the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`DatasetError::InvalidConfig`] describing the first problem.
    pub fn validate(&self) -> DatasetResult<()> {
        if self.file_name.as_os_str().is_empty() {
            return Err(DatasetError::invalid_config("file_name is required"));
        }
        if self.words_per_row == 0 {
            return Err(DatasetError::invalid_config("words_per_row must be positive"));
        }
        if self.unidentified_instance_name.is_empty() {
            return Err(DatasetError::invalid_config(
                "unidentified_instance_name must not be empty",
            ));
        }
        for (code, label) in &self.fragment_type_map {
            if *code == FragmentType::INVALID {
                return Err(DatasetError::invalid_config(format!(
                    "label '{label}' mapped to invalid type 0"
                )));
            }
            if label.is_empty() {
                return Err(DatasetError::invalid_config(format!(
                    "empty label for type {code}"
                )));
            }
        }
        for (code, base) in &self.dataset_base_names {
            if base.is_empty() {
                return Err(DatasetError::invalid_config(format!(
                    "empty dataset base name for type {code}"
                )));
            }
        }
        if let Some(code) = self
            .always_container_types
            .iter()
            .find(|code| self.unwrap_container_types.contains(code))
        {
            return Err(DatasetError::invalid_config(format!(
                "type {code} is both always-container and unwrap"
            )));
        }
        Ok(())
    }
}
