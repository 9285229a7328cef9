//! Cached operator port pick, so maintenance commands survive restarts
//! without re-running interactive selection.

use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;

fn port_file() -> PathBuf {
    PathBuf::from(".vend-port")
}

pub fn read_port() -> Result<Option<String>> {
    let path = port_file();
    if !path.exists() {
        return Ok(None);
    }
    let val = fs::read_to_string(&path).with_context(|| format!("read {:?}", path))?;
    let val = val.trim().to_string();
    Ok(if val.is_empty() { None } else { Some(val) })
}

pub fn write_port(val: &str) -> Result<()> {
    let path = port_file();
    fs::write(&path, val.trim()).with_context(|| format!("write {:?}", path))
}
