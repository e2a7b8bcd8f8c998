//! CLI command implementations.

pub mod convert;
pub mod dump;
pub mod inspect;

use daqstore_core::{
    make_resolver, names::parse_plugin, DatasetConfig, DatasetMode, TypeNameResolver,
};
use std::path::Path;

/// Read configuration for `path` using the named resolver plugin.
pub fn read_config(
    path: &Path,
    resolver: &str,
) -> Result<DatasetConfig, Box<dyn std::error::Error>> {
    if !path.exists() {
        return Err(format!("No data file found at {}", path.display()).into());
    }
    Ok(DatasetConfig::new(path)
        .mode(DatasetMode::Read)
        .name_resolver(parse_plugin(resolver)?))
}

/// Resolver matching a configuration.
pub fn resolver_for(config: &DatasetConfig) -> Box<dyn TypeNameResolver> {
    make_resolver(
        config.name_resolver,
        &config.unidentified_instance_name,
        &config.fragment_type_map,
    )
}
