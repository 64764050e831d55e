use std::env;
use std::path::PathBuf;

use anyhow::{Context, Result};

const DATA_DIR_ENV: &str = "ANISYNC_DATA_DIR";

pub fn data_dir() -> Result<PathBuf> {
    if let Ok(dir) = env::var(DATA_DIR_ENV)
        && !dir.trim().is_empty()
    {
        return Ok(PathBuf::from(dir.trim()));
    }
    let base = dirs::data_dir().context("unable to resolve data directory")?;
    Ok(base.join("anisync"))
}

pub fn database_file_path() -> Result<PathBuf> {
    Ok(data_dir()?.join("anisync.db"))
}

pub fn changeset_file_path(session_id: &str) -> Result<PathBuf> {
    Ok(data_dir()?
        .join("changesets")
        .join(format!("changeset_{session_id}.json")))
}

pub fn diagnostics_file_path(session_id: &str) -> Result<PathBuf> {
    Ok(data_dir()?
        .join("changesets")
        .join(format!("diagnostics_{session_id}.json")))
}
