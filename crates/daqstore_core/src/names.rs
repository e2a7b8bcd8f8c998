//! Fragment type to instance-name resolution.
//!
//! Every fragment is routed to a string label ("instance name") derived
//! from its type code. Unmapped codes fall back to a configurable
//! unidentified label. A container resolves to the container label
//! followed by the label of its nested type, e.g. `ContainerTPC`.

use crate::error::{DatasetError, DatasetResult};
use crate::fragment::{ContainerMetadata, Fragment};
use crate::types::FragmentType;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use tracing::warn;

/// Default label for unmapped type codes.
pub const DEFAULT_UNIDENTIFIED_LABEL: &str = "unidentified";

/// Label used for containers when the container type itself is unmapped.
const FALLBACK_CONTAINER_LABEL: &str = "Container";

/// Outcome of resolving a fragment to a label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameResolution {
    /// Whether every type involved had a mapping.
    pub found: bool,
    /// The label to route the fragment to.
    pub label: String,
}

/// Maps fragment type codes to labels.
pub trait TypeNameResolver: fmt::Debug + Send + Sync {
    /// Replaces the whole mapping table.
    fn set_basic_types(&mut self, types: &[(FragmentType, String)]);

    /// Adds or replaces one mapping.
    fn add_extra_type(&mut self, fragment_type: FragmentType, label: &str);

    /// Label for a type code, if mapped.
    fn label_for_type(&self, fragment_type: FragmentType) -> Option<&str>;

    /// Every mapped `(type, label)` pair in type order.
    fn mappings(&self) -> Vec<(FragmentType, String)>;

    /// Label standing in for unmapped codes.
    fn unidentified_label(&self) -> &str;

    /// Resolves a bare type code, falling back to the unidentified label.
    fn resolve_type(&self, fragment_type: FragmentType) -> NameResolution {
        match self.label_for_type(fragment_type) {
            Some(label) => NameResolution {
                found: true,
                label: label.to_string(),
            },
            None => NameResolution {
                found: false,
                label: self.unidentified_label().to_string(),
            },
        }
    }

    /// Resolves a fragment. Containers combine the container label with the
    /// label of their nested type.
    fn resolve(&self, fragment: &Fragment) -> NameResolution {
        if !fragment.is_container() {
            let resolution = self.resolve_type(fragment.fragment_type());
            if !resolution.found {
                warn!(
                    fragment_type = fragment.fragment_type().as_u8(),
                    label = %resolution.label,
                    "no label for fragment type, using unidentified label"
                );
            }
            return resolution;
        }

        let container = self.resolve_type(FragmentType::CONTAINER);
        let container_label = if container.found {
            container.label
        } else {
            FALLBACK_CONTAINER_LABEL.to_string()
        };

        let nested = ContainerMetadata::of(fragment)
            .ok()
            .and_then(|metadata| self.label_for_type(metadata.nested_type));
        match nested {
            Some(nested_label) if container.found => NameResolution {
                found: true,
                label: format!("{container_label}{nested_label}"),
            },
            _ => {
                warn!(
                    sequence_id = fragment.sequence_id().as_u64(),
                    fragment_id = fragment.fragment_id().as_u16(),
                    "container nested type has no label, using container label"
                );
                NameResolution {
                    found: false,
                    label: container_label,
                }
            }
        }
    }

    /// All labels a writer may route to: every direct label and the
    /// container label combined with every direct label.
    fn all_labels(&self) -> BTreeSet<String> {
        let mappings = self.mappings();
        let container_label = self
            .label_for_type(FragmentType::CONTAINER)
            .unwrap_or(FALLBACK_CONTAINER_LABEL)
            .to_string();

        let mut labels = BTreeSet::new();
        labels.insert(self.unidentified_label().to_string());
        for (_, label) in &mappings {
            labels.insert(label.clone());
            labels.insert(format!("{container_label}{label}"));
        }
        labels
    }
}

/// Built-in resolver plugins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolverPlugin {
    /// System types only.
    #[default]
    System,
    /// System types plus the detector type set.
    Detector,
}

impl ResolverPlugin {
    /// The plugin's basic type table.
    #[must_use]
    pub fn basic_types(self) -> Vec<(FragmentType, String)> {
        let mut types: Vec<(FragmentType, String)> = SYSTEM_TYPES
            .iter()
            .map(|(code, label)| (FragmentType::new(*code), (*label).to_string()))
            .collect();
        if self == Self::Detector {
            types.extend(
                DETECTOR_TYPES
                    .iter()
                    .map(|(code, label)| (FragmentType::new(*code), (*label).to_string())),
            );
        }
        types
    }
}

impl fmt::Display for ResolverPlugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::System => write!(f, "system"),
            Self::Detector => write!(f, "detector"),
        }
    }
}

impl FromStr for ResolverPlugin {
    type Err = DatasetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "system" => Ok(Self::System),
            "detector" => Ok(Self::Detector),
            other => Err(DatasetError::invalid_config(format!(
                "unknown name resolver plugin '{other}'"
            ))),
        }
    }
}

const SYSTEM_TYPES: &[(u8, &str)] = &[
    (FragmentType::DATA.as_u8(), "Data"),
    (FragmentType::EMPTY.as_u8(), "Empty"),
    (FragmentType::CONTAINER.as_u8(), "Container"),
    (FragmentType::ERROR.as_u8(), "Error"),
];

const DETECTOR_TYPES: &[(u8, &str)] = &[
    (1, "MISSED"),
    (2, "TPC"),
    (3, "PHOTON"),
    (4, "TRIGGER"),
    (5, "TIMING"),
    (6, "TOY1"),
    (7, "TOY2"),
    (8, "FELIX"),
    (9, "CRT"),
    (10, "CTB"),
    (11, "CPUHITS"),
    (12, "DEVBOARDHITS"),
    (13, "UNKNOWN"),
];

/// Table-driven [`TypeNameResolver`].
#[derive(Debug, Clone)]
pub struct TypeNameTable {
    labels: BTreeMap<FragmentType, String>,
    unidentified: String,
}

impl TypeNameTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new(unidentified: impl Into<String>) -> Self {
        Self {
            labels: BTreeMap::new(),
            unidentified: unidentified.into(),
        }
    }

    /// Creates a table holding a plugin's basic types.
    #[must_use]
    pub fn for_plugin(plugin: ResolverPlugin, unidentified: impl Into<String>) -> Self {
        let mut table = Self::new(unidentified);
        table.set_basic_types(&plugin.basic_types());
        table
    }
}

impl Default for TypeNameTable {
    fn default() -> Self {
        Self::for_plugin(ResolverPlugin::System, DEFAULT_UNIDENTIFIED_LABEL)
    }
}

impl TypeNameResolver for TypeNameTable {
    fn set_basic_types(&mut self, types: &[(FragmentType, String)]) {
        self.labels = types.iter().cloned().collect();
    }

    fn add_extra_type(&mut self, fragment_type: FragmentType, label: &str) {
        self.labels.insert(fragment_type, label.to_string());
    }

    fn label_for_type(&self, fragment_type: FragmentType) -> Option<&str> {
        self.labels.get(&fragment_type).map(String::as_str)
    }

    fn mappings(&self) -> Vec<(FragmentType, String)> {
        self.labels
            .iter()
            .map(|(code, label)| (*code, label.clone()))
            .collect()
    }

    fn unidentified_label(&self) -> &str {
        &self.unidentified
    }
}

/// Builds the resolver for a plugin, with `overrides` applied after the
/// plugin's basic types.
#[must_use]
pub fn make_resolver(
    plugin: ResolverPlugin,
    unidentified: &str,
    overrides: &[(FragmentType, String)],
) -> Box<dyn TypeNameResolver> {
    let mut table = TypeNameTable::for_plugin(plugin, unidentified);
    for (fragment_type, label) in overrides {
        table.add_extra_type(*fragment_type, label);
    }
    Box::new(table)
}

/// Parses a resolver plugin name.
///
/// # Errors
///
/// Fails for names other than `system` and `detector`.
pub fn parse_plugin(name: &str) -> DatasetResult<ResolverPlugin> {
    name.parse()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fragment::ContainerFragmentLoader;
    use crate::types::{FragmentId, SequenceId};

    fn fragment(code: u8) -> Fragment {
        Fragment::new(
            FragmentType::new(code),
            SequenceId::new(1),
            FragmentId::new(0),
            vec![1],
        )
    }

    fn container_of(code: u8) -> Fragment {
        let mut loader = ContainerFragmentLoader::new(SequenceId::new(1), FragmentId::new(0), 0);
        loader.add_fragment(&fragment(code)).unwrap();
        loader.finish().unwrap()
    }

    #[test]
    fn system_plugin_labels() {
        let table = TypeNameTable::default();
        assert_eq!(table.label_for_type(FragmentType::DATA), Some("Data"));
        assert_eq!(table.label_for_type(FragmentType::CONTAINER), Some("Container"));
        assert_eq!(table.label_for_type(FragmentType::new(2)), None);
    }

    #[test]
    fn detector_plugin_labels() {
        let table = TypeNameTable::for_plugin(ResolverPlugin::Detector, "unidentified");
        assert_eq!(table.label_for_type(FragmentType::new(2)), Some("TPC"));
        assert_eq!(table.label_for_type(FragmentType::new(13)), Some("UNKNOWN"));
        assert_eq!(table.label_for_type(FragmentType::ERROR), Some("Error"));
    }

    #[test]
    fn unknown_type_falls_back() {
        let table = TypeNameTable::new("mystery");
        let resolution = table.resolve(&fragment(42));
        assert!(!resolution.found);
        assert_eq!(resolution.label, "mystery");
    }

    #[test]
    fn extra_types_override_plugin() {
        let resolver = make_resolver(
            ResolverPlugin::Detector,
            "unidentified",
            &[
                (FragmentType::new(2), "APA".to_string()),
                (FragmentType::new(40), "Laser".to_string()),
            ],
        );
        assert_eq!(resolver.resolve(&fragment(2)).label, "APA");
        assert_eq!(resolver.resolve(&fragment(40)).label, "Laser");
    }

    #[test]
    fn container_combines_labels() {
        let table = TypeNameTable::for_plugin(ResolverPlugin::Detector, "unidentified");
        let resolution = table.resolve(&container_of(2));
        assert_eq!(
            resolution,
            NameResolution {
                found: true,
                label: "ContainerTPC".to_string()
            }
        );
    }

    #[test]
    fn container_with_unmapped_nested_type() {
        let table = TypeNameTable::default();
        let resolution = table.resolve(&container_of(77));
        assert!(!resolution.found);
        assert_eq!(resolution.label, "Container");
    }

    #[test]
    fn container_without_metadata_is_not_found() {
        let table = TypeNameTable::default();
        let bare = Fragment::new(
            FragmentType::CONTAINER,
            SequenceId::new(1),
            FragmentId::new(0),
            vec![],
        );
        assert!(!table.resolve(&bare).found);
    }

    #[test]
    fn all_labels_include_container_combinations() {
        let mut table = TypeNameTable::default();
        table.add_extra_type(FragmentType::new(2), "TPC");
        let labels = table.all_labels();
        assert!(labels.contains("TPC"));
        assert!(labels.contains("ContainerTPC"));
        assert!(labels.contains("Data"));
        assert!(labels.contains("ContainerData"));
        assert!(labels.contains("unidentified"));
    }

    #[test]
    fn set_basic_types_replaces_table() {
        let mut table = TypeNameTable::default();
        table.set_basic_types(&[(FragmentType::new(7), "Only".to_string())]);
        assert_eq!(table.mappings().len(), 1);
        assert_eq!(table.label_for_type(FragmentType::DATA), None);
    }

    #[test]
    fn plugin_names_parse() {
        assert_eq!(parse_plugin("system").unwrap(), ResolverPlugin::System);
        assert_eq!(parse_plugin("detector").unwrap(), ResolverPlugin::Detector);
        assert!(matches!(
            parse_plugin("art"),
            Err(DatasetError::InvalidConfig { .. })
        ));
        assert_eq!(ResolverPlugin::Detector.to_string(), "detector");
    }
}
