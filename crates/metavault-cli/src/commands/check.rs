use std::path::Path;

use anyhow::Result;

use super::load_config;

/// Execute the `check` command: parse and validate an admin config.
pub fn execute(path: &Path) -> Result<()> {
    let config = load_config(Some(path))?;
    tracing::info!(path = %path.display(), version = %config.version, "Config validated");
    println!("Config: OK");
    println!("  spec repo:        {}", config.spec_repo);
    println!("  local root:       {}", config.object_store.local_root.display());
    println!(
        "  compression:      {} (zstd level {})",
        config.compression.codec, config.compression.zstd_level
    );
    println!("  max record bytes: {}", config.limits.max_record_bytes);
    println!("  channel capacity: {}", config.transport.channel_capacity);
    Ok(())
}
