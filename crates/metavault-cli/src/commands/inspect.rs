use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};
use metavault_store::{decompressing_reader, ObjectUrl, RecordReader};
use metavault_types::Envelope;

use super::load_config;

/// Execute the `inspect` command: decode every operation in a dump.
///
/// `dump` is either a local file path or an object-store URL resolved
/// through the configured stores.
pub fn execute(dump: &str, json: bool, config: Option<&Path>) -> Result<()> {
    let config = load_config(config)?;

    let raw: Box<dyn Read + Send> = if dump.contains("://") {
        let url = ObjectUrl::parse(dump)?;
        config
            .object_stores()
            .open_reader(&url)
            .with_context(|| format!("Failed to open dump: {url}"))?
    } else {
        Box::new(File::open(dump).with_context(|| format!("Failed to open dump: {dump}"))?)
    };
    let reader = decompressing_reader(raw).context("Failed to open compressed stream")?;
    let mut records = RecordReader::new(reader, config.limits.max_record_bytes);
    tracing::info!(
        dump,
        max_record_bytes = config.limits.max_record_bytes,
        "Reading dump"
    );

    let mut kinds: BTreeMap<(String, &'static str), u64> = BTreeMap::new();
    let mut index = 0u64;
    while let Some(bytes) = records
        .read_record()
        .with_context(|| format!("Failed to read record {index}"))?
    {
        let op = Envelope::from_bytes(bytes)
            .decode()
            .with_context(|| format!("Failed to decode record {index}"))?;
        if json {
            println!("{}", serde_json::to_string(&op)?);
        } else {
            println!("{index:>6}  {:<5} {}", op.version(), op.kind());
        }
        *kinds.entry((op.version().to_string(), op.kind())).or_default() += 1;
        index += 1;
    }

    tracing::debug!(operations = index, kinds = kinds.len(), "Dump read");
    if !json {
        println!();
        println!("{index} operation(s)");
        for ((version, kind), count) in &kinds {
            println!("  {version:<5} {kind:<32} {count}");
        }
    }
    Ok(())
}
