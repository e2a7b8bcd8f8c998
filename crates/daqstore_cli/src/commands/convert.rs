//! Convert command implementation.

use daqstore_core::{open_dataset, DatasetConfig, DatasetMode, LayoutKind};
use std::path::{Path, PathBuf};
use tracing::info;

/// Conversion summary.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ConvertStats {
    /// Events copied.
    pub events: u64,
    /// Fragments copied.
    pub fragments: u64,
    /// Headers copied.
    pub headers: u64,
}

/// Runs the convert command.
pub fn run(
    input: &Path,
    output: &Path,
    layout: &str,
    words_per_row: Option<usize>,
    config: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    let layout: LayoutKind = layout.parse()?;
    let stats = convert(input, output, layout, words_per_row, config)?;
    println!(
        "Converted {} events ({} fragments, {} headers) to {} layout",
        stats.events, stats.fragments, stats.headers, layout
    );
    Ok(())
}

/// Resolves `output` to the path it would be created at. Missing parent
/// directories are created, as the writer would do anyway.
fn resolve_output(output: &Path) -> std::io::Result<PathBuf> {
    if output.exists() {
        return std::fs::canonicalize(output);
    }
    let Some(name) = output.file_name() else {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("{} does not name a file", output.display()),
        ));
    };
    let parent = match output.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent)?;
    Ok(std::fs::canonicalize(parent)?.join(name))
}

/// Copies every event and header of `input` into a new `output` file.
///
/// Headers are written ahead of the first event whose sequence id they do
/// not exceed, so headers of events without fragments are kept.
pub fn convert(
    input: &Path,
    output: &Path,
    layout: LayoutKind,
    words_per_row: Option<usize>,
    config: Option<&Path>,
) -> Result<ConvertStats, Box<dyn std::error::Error>> {
    if !input.exists() {
        return Err(format!("No data file found at {}", input.display()).into());
    }
    if std::fs::canonicalize(input)? == resolve_output(output)? {
        return Err("Input and output must be different files".into());
    }

    let base = match config {
        Some(path) => DatasetConfig::from_json_file(path)?,
        None => DatasetConfig::default(),
    };
    let mut write_config = base
        .clone()
        .mode(DatasetMode::Write)
        .file_name(output)
        .layout(layout);
    if let Some(words) = words_per_row {
        write_config = write_config.words_per_row(words);
    }
    let read_config = base.mode(DatasetMode::Read).file_name(input);

    let mut reader = open_dataset(&read_config)?;
    let mut writer = open_dataset(&write_config)?;
    info!(
        input = %input.display(),
        output = %output.display(),
        from = %reader.layout(),
        to = %layout,
        "converting"
    );

    let mut stats = ConvertStats::default();
    let mut headers = reader.event_headers()?.into_iter().peekable();
    loop {
        let event = reader.read_next_event()?;
        let Some(sequence_id) = event.values().flatten().next().map(|f| f.sequence_id()) else {
            break;
        };
        while let Some(header) = headers.next_if(|h| h.sequence_id <= sequence_id) {
            writer.insert_header(&header)?;
            stats.headers += 1;
        }
        for fragments in event.values() {
            writer.insert_many(fragments)?;
            stats.fragments += fragments.len() as u64;
        }
        stats.events += 1;
    }
    for header in headers {
        writer.insert_header(&header)?;
        stats.headers += 1;
    }
    writer.flush()?;

    info!(
        events = stats.events,
        fragments = stats.fragments,
        headers = stats.headers,
        "conversion finished"
    );
    Ok(stats)
}
