use std::fs;
use std::io::Write;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use tempfile::Builder;

use crate::error::CarbotaxError;

pub fn write_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), CarbotaxError> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_str().is_empty() => parent.to_path_buf(),
        _ => Utf8PathBuf::from("."),
    };
    fs::create_dir_all(parent.as_std_path())
        .map_err(|err| CarbotaxError::Filesystem(err.to_string()))?;
    let mut temp = Builder::new()
        .prefix(".carbotax-tmp")
        .tempfile_in(parent.as_std_path())
        .map_err(|err| CarbotaxError::Filesystem(err.to_string()))?;
    temp.write_all(content)
        .map_err(|err| CarbotaxError::Filesystem(err.to_string()))?;
    temp.flush()
        .map_err(|err| CarbotaxError::Filesystem(err.to_string()))?;
    temp.persist(path.as_std_path())
        .map_err(|err| CarbotaxError::Filesystem(err.to_string()))?;
    Ok(())
}

pub fn write_json_atomic<T: Serialize>(path: &Utf8Path, value: &T) -> Result<(), CarbotaxError> {
    let content =
        serde_json::to_vec_pretty(value).map_err(|err| CarbotaxError::Filesystem(err.to_string()))?;
    write_atomic(path, &content)
}

pub fn unique_json_path(dir: &Utf8Path, stem: &str) -> Utf8PathBuf {
    let mut candidate = dir.join(format!("{stem}.json"));
    let mut suffix = 1usize;
    while candidate.as_std_path().exists() {
        candidate = dir.join(format!("{stem}_{suffix}.json"));
        suffix += 1;
    }
    candidate
}
