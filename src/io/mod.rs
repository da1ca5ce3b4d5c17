//! Tabular I/O for the scheduling core (§6 "External interfaces").

pub mod csv;
pub mod loader;

use std::fs::create_dir_all;
use std::path::Path;

use crate::error::{CoreError, CoreResult};

fn ensure_parent_folder_exists(file_path: &Path) -> CoreResult<()> {
    let Some(parent) = file_path.parent() else {
        return Ok(());
    };
    if parent.as_os_str().is_empty() {
        return Ok(());
    }
    create_dir_all(parent).map_err(|source| CoreError::Io {
        path: file_path.to_path_buf(),
        source,
    })
}
