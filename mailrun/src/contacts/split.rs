//! Splitting large lists into smaller files.

use std::path::{Path, PathBuf};

use super::{ContactTable, ContactsError, write_table};

/// Cut `table` into consecutive tables of at most `max_per_file` rows, each
/// keeping the original header.
#[must_use]
pub fn split_rows(table: &ContactTable, max_per_file: usize) -> Vec<ContactTable> {
    table
        .rows
        .chunks(max_per_file.max(1))
        .map(|rows| ContactTable {
            headers: table.headers.clone(),
            rows: rows.to_vec(),
        })
        .collect()
}

/// Write the parts of `table` as `contacts_<n>.csv` into `directory`,
/// numbered from 1. Returns each file with its row count.
///
/// # Errors
///
/// Fails on the first file that cannot be written.
pub fn write_split(
    directory: &Path,
    table: &ContactTable,
    max_per_file: usize,
) -> Result<Vec<(PathBuf, usize)>, ContactsError> {
    split_rows(table, max_per_file)
        .into_iter()
        .enumerate()
        .map(|(index, part)| {
            let path = directory.join(format!("contacts_{}.csv", index + 1));
            write_table(&path, &part)?;
            Ok((path, part.rows.len()))
        })
        .collect()
}
