//! Inspect command implementation.

use super::{read_config, resolver_for};
use daqstore_core::{open_dataset, FragmentType};
use daqstore_storage::{FileBackend, StorageBackend};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

/// File inspection result.
#[derive(Debug, Default, Serialize)]
pub struct InspectResult {
    /// File path.
    pub path: String,
    /// Physical layout.
    pub layout: String,
    /// File size in bytes.
    pub file_size: u64,
    /// Number of events.
    pub event_count: u64,
    /// Number of fragments.
    pub fragment_count: u64,
    /// Encoded size of all fragments in bytes.
    pub fragment_bytes: u64,
    /// Events whose header was found.
    pub headers_found: u64,
    /// Per-type statistics.
    pub types: Vec<TypeStats>,
}

/// Statistics for a single fragment type.
#[derive(Debug, Serialize)]
pub struct TypeStats {
    /// Type code.
    pub fragment_type: u8,
    /// Resolved label.
    pub label: String,
    /// Number of fragments.
    pub count: u64,
}

/// Runs the inspect command.
pub fn run(path: &Path, resolver: &str, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let result = inspect(path, resolver)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }

    Ok(())
}

/// Reads every event of the file and collects statistics.
pub fn inspect(path: &Path, resolver: &str) -> Result<InspectResult, Box<dyn std::error::Error>> {
    let config = read_config(path, resolver)?;
    let names = resolver_for(&config);
    let file_size = FileBackend::open_read_only(path)?.size()?;
    let mut dataset = open_dataset(&config)?;

    let mut result = InspectResult {
        path: path.display().to_string(),
        layout: dataset.layout().to_string(),
        file_size,
        ..InspectResult::default()
    };
    let mut per_type: BTreeMap<FragmentType, u64> = BTreeMap::new();

    loop {
        let event = dataset.read_next_event()?;
        if event.is_empty() {
            break;
        }
        result.event_count += 1;

        let first = event.values().flatten().next().map(|f| f.sequence_id());
        if let Some(sequence_id) = first {
            if dataset.get_event_header(sequence_id)?.is_some() {
                result.headers_found += 1;
            }
        }

        for (code, fragments) in &event {
            *per_type.entry(*code).or_insert(0) += fragments.len() as u64;
            result.fragment_count += fragments.len() as u64;
            result.fragment_bytes += fragments.iter().map(|f| f.size_bytes() as u64).sum::<u64>();
        }
    }

    result.types = per_type
        .into_iter()
        .map(|(code, count)| TypeStats {
            fragment_type: code.as_u8(),
            label: names.resolve_type(code).label,
            count,
        })
        .collect();
    Ok(result)
}

fn print_text_output(result: &InspectResult) {
    println!("daqstore File Inspection");
    println!("========================");
    println!();
    println!("Path:   {}", result.path);
    println!("Layout: {}", result.layout);
    println!("Size:   {}", format_size(result.file_size));
    println!();
    println!("Events:");
    println!("  Events:        {}", result.event_count);
    println!("  Headers found: {}", result.headers_found);
    println!();
    println!("Fragments:");
    println!("  Fragments:     {}", result.fragment_count);
    println!("  Fragment size: {}", format_size(result.fragment_bytes));

    if !result.types.is_empty() {
        println!();
        println!("Types:");
        for stats in &result.types {
            println!(
                "  [{}] {}: {} fragments",
                stats.fragment_type, stats.label, stats.count
            );
        }
    }
}

fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} bytes", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.1} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use daqstore_core::{DatasetConfig, Fragment, FragmentId, RawEventHeader, SequenceId};
    use tempfile::tempdir;

    #[test]
    fn counts_events_and_types() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("inspect.dqst");
        {
            let mut ds = open_dataset(&DatasetConfig::new(&path).words_per_row(2)).unwrap();
            ds.insert_header(&RawEventHeader::new(1, 1, 1, SequenceId::new(1))).unwrap();
            for seq in 1..=2 {
                ds.insert_one(&Fragment::new(
                    FragmentType::DATA,
                    SequenceId::new(seq),
                    FragmentId::new(0),
                    vec![1, 2, 3],
                ))
                .unwrap();
            }
        }

        let result = inspect(&path, "system").unwrap();
        assert_eq!(result.layout, "ntuple");
        assert_eq!(result.event_count, 2);
        assert_eq!(result.fragment_count, 2);
        assert_eq!(result.fragment_bytes, 2 * 7 * 8);
        assert_eq!(result.headers_found, 1);
        assert_eq!(result.types.len(), 1);
        assert_eq!(result.types[0].label, "Data");
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempdir().unwrap();
        assert!(inspect(&dir.path().join("absent.dqst"), "system").is_err());
    }

    #[test]
    fn sizes_are_human_readable() {
        assert_eq!(format_size(512), "512 bytes");
        assert_eq!(format_size(2048), "2.0 KB");
    }
}
