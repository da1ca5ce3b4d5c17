use std::{fs::OpenOptions, path::Path};

use serde::{de::DeserializeOwned, Serialize};

use crate::error::{CoreError, CoreResult};

use super::ensure_parent_folder_exists;

/// Serialize `objects` to `file_path` as CSV with headers, truncating any
/// existing file. Outputs are always a fresh artifact of a single pass (§5
/// "Ordering guarantees"), so append semantics are unnecessary here.
pub fn write_to_file<T: Serialize>(file_path: impl AsRef<Path>, objects: &[T]) -> CoreResult<()> {
    let file_path = file_path.as_ref();
    ensure_parent_folder_exists(file_path)?;

    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(file_path)
        .map_err(|source| CoreError::Io {
            path: file_path.to_path_buf(),
            source,
        })?;

    let mut writer = csv::WriterBuilder::new().has_headers(true).from_writer(file);
    for object in objects {
        writer.serialize(object).map_err(|source| CoreError::Csv {
            path: file_path.to_path_buf(),
            source,
        })?;
    }
    writer.flush().map_err(|source| CoreError::Io {
        path: file_path.to_path_buf(),
        source,
    })
}

/// Read and deserialize every row of a required input file.
///
/// The file itself must exist (§7 "Missing input" — abort, do not partially
/// produce output); rows that fail to deserialize are skipped and logged,
/// mirroring the cleaning layer's policy of coercing malformed cells instead
/// of aborting the whole load.
pub fn read_from_file<T: DeserializeOwned>(file_path: impl AsRef<Path>) -> CoreResult<Vec<T>> {
    let file_path = file_path.as_ref();

    if !file_path.exists() {
        return Err(CoreError::MissingInput(file_path.to_path_buf()));
    }

    let file = OpenOptions::new()
        .read(true)
        .open(file_path)
        .map_err(|source| CoreError::Io {
            path: file_path.to_path_buf(),
            source,
        })?;

    let mut reader = csv::ReaderBuilder::new().has_headers(true).from_reader(file);

    let mut rows = Vec::new();
    for result in reader.deserialize::<T>() {
        match result {
            Ok(row) => rows.push(row),
            Err(why) => log::warn!("skipping malformed row in {}: {why}", file_path.display()),
        }
    }
    Ok(rows)
}
