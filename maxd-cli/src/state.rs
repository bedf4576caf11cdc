use anyhow::{Context, Result};
use std::path::PathBuf;

/// `$HOME/.maxd`, home of the default config file.
pub fn maxd_home() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME is not set")?;
    Ok(PathBuf::from(home).join(".maxd"))
}
