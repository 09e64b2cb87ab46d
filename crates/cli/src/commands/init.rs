//! `diskdoc init`: write the default configuration file.

use std::path::Path;

use anyhow::Context;
use diskdoc_config::AppConfig;

pub fn run(force: bool) -> anyhow::Result<()> {
    let path = AppConfig::config_dir().join("config.toml");

    if write_default(&path, force)? {
        println!("Created config at: {}", path.display());
        println!();
        println!("Next steps:");
        println!("  1. Set ANTHROPIC_API_KEY or OPENAI_API_KEY, or add api_key to the file");
        println!("  2. Run: diskdoc run \"why is my disk full?\"");
    } else {
        println!("Config already exists at: {}", path.display());
        println!("Edit it manually or re-run with --force.");
    }
    Ok(())
}

/// Write the default TOML to `path`. Returns `false` when a file is already
/// there and `force` is off.
pub fn write_default(path: &Path, force: bool) -> anyhow::Result<bool> {
    if path.exists() && !force {
        return Ok(false);
    }
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
    }
    std::fs::write(path, AppConfig::default_toml())
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(true)
}
