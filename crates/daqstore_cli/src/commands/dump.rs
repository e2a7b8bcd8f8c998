//! Dump command implementation.

use super::{read_config, resolver_for};
use daqstore_core::{open_dataset, ContainerMetadata, RawEventHeader};
use serde::Serialize;
use std::path::Path;

/// Event representation for output.
#[derive(Debug, Serialize)]
pub struct EventInfo {
    /// Event key.
    pub sequence_id: u64,
    /// Header, if one was stored.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub header: Option<RawEventHeader>,
    /// Fragments in read order.
    pub fragments: Vec<FragmentInfo>,
}

/// Fragment representation for output.
#[derive(Debug, Serialize)]
pub struct FragmentInfo {
    /// Resolved label.
    pub label: String,
    /// Type code.
    pub fragment_type: u8,
    /// Fragment id.
    pub fragment_id: u16,
    /// Timestamp.
    pub timestamp: u64,
    /// Total words including the header.
    pub word_count: usize,
    /// Nested block count (containers only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_blocks: Option<u32>,
}

/// Runs the dump command.
pub fn run(
    path: &Path,
    limit: Option<usize>,
    resolver: &str,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let events = read_events(path, limit, resolver)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&events)?);
        }
        _ => {
            print_text_output(&events);
        }
    }

    Ok(())
}

/// Reads up to `limit` events.
pub fn read_events(
    path: &Path,
    limit: Option<usize>,
    resolver: &str,
) -> Result<Vec<EventInfo>, Box<dyn std::error::Error>> {
    let config = read_config(path, resolver)?;
    let names = resolver_for(&config);
    let mut dataset = open_dataset(&config)?;
    let max_events = limit.unwrap_or(usize::MAX);
    let mut events = Vec::new();

    while events.len() < max_events {
        let event = dataset.read_next_event()?;
        let Some(sequence_id) = event.values().flatten().next().map(|f| f.sequence_id()) else {
            break;
        };
        let header = dataset.get_event_header(sequence_id)?;

        let fragments = event
            .values()
            .flatten()
            .map(|fragment| FragmentInfo {
                label: names.resolve(fragment).label,
                fragment_type: fragment.fragment_type().as_u8(),
                fragment_id: fragment.fragment_id().as_u16(),
                timestamp: fragment.timestamp(),
                word_count: fragment.word_count(),
                container_blocks: ContainerMetadata::of(fragment)
                    .ok()
                    .map(|metadata| metadata.block_count),
            })
            .collect();

        events.push(EventInfo {
            sequence_id: sequence_id.as_u64(),
            header,
            fragments,
        });
    }

    Ok(events)
}

fn print_text_output(events: &[EventInfo]) {
    for event in events {
        match &event.header {
            Some(header) => println!(
                "Event {} (run {}, subrun {}, event {}, {})",
                event.sequence_id,
                header.run_id,
                header.subrun_id,
                header.event_id,
                if header.is_complete { "complete" } else { "incomplete" }
            ),
            None => println!("Event {} (no header)", event.sequence_id),
        }
        for fragment in &event.fragments {
            print!(
                "  {:<16} type={:<3} id={:<5} ts={} words={}",
                fragment.label,
                fragment.fragment_type,
                fragment.fragment_id,
                fragment.timestamp,
                fragment.word_count
            );
            if let Some(blocks) = fragment.container_blocks {
                print!(" blocks={blocks}");
            }
            println!();
        }
    }
    println!();
    println!("Total events: {}", events.len());
}

#[cfg(test)]
mod tests {
    use super::*;
    use daqstore_core::{
        ContainerFragmentLoader, DatasetConfig, Fragment, FragmentId, FragmentType, LayoutKind,
        SequenceId,
    };
    use tempfile::tempdir;

    #[test]
    fn dumps_events_with_limit() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("dump.dqst");
        {
            let config = DatasetConfig::new(&path).layout(LayoutKind::Grouped);
            let mut ds = open_dataset(&config).unwrap();
            for seq in 1..=3 {
                ds.insert_header(&RawEventHeader::new(2, 1, seq as u32, SequenceId::new(seq)))
                    .unwrap();
                let mut loader =
                    ContainerFragmentLoader::new(SequenceId::new(seq), FragmentId::new(4), 0);
                for fid in 0..2 {
                    loader
                        .add_fragment(&Fragment::new(
                            FragmentType::DATA,
                            SequenceId::new(seq),
                            FragmentId::new(fid),
                            vec![seq],
                        ))
                        .unwrap();
                }
                ds.insert_one(&loader.finish().unwrap()).unwrap();
            }
        }

        let events = read_events(&path, Some(2), "system").unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].sequence_id, 2);
        assert_eq!(events[1].header.unwrap().event_id, 2);
        let container = &events[0].fragments[0];
        assert_eq!(container.label, "ContainerData");
        assert_eq!(container.container_blocks, Some(2));
    }
}
