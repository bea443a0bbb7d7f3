//! Contact list files.
//!
//! Input lists come from many exports with inconsistent headers, so the
//! email and name columns are detected from the header row. Output files
//! always use fixed headers whose column order downstream tools rely on.

pub mod canary;
pub mod clean;
pub mod split;

use std::{
    fs,
    path::{Path, PathBuf},
};

use mailrun_common::Contact;
use mailrun_validation::{RejectionRecord, reputation::ReputationRow};
use thiserror::Error;

pub use canary::{CanarySplit, sample_canary};
pub use clean::{CleanOptions, CleanSummary, clean_email, clean_name, clean_table};
pub use split::{split_rows, write_split};

pub const CONTACTS_HEADER: [&str; 2] = ["name", "email"];
pub const REJECTIONS_HEADER: [&str; 4] = ["name", "email", "reason", "detail"];
pub const REPUTATION_HEADER: [&str; 8] = [
    "name",
    "email",
    "result",
    "status_text",
    "substatus_text",
    "is_disposable",
    "is_role",
    "is_free",
];

#[derive(Debug, Error)]
pub enum ContactsError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed CSV in {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("{0} has no header row")]
    MissingHeader(PathBuf),
}

/// A CSV file as read: trimmed headers and raw records.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContactTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

/// Where the email and name live in a [`ContactTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnMap {
    pub email: usize,
    /// `None` when the file has no usable name column.
    pub name: Option<usize>,
}

impl ColumnMap {
    /// The email column is the first header mentioning `mail`, falling back
    /// to the second column. The name column is `name` or `nome`, falling
    /// back to the column before the email.
    #[must_use]
    pub fn detect(headers: &[String]) -> Self {
        let lowered: Vec<String> = headers.iter().map(|h| h.to_lowercase()).collect();

        let email = lowered
            .iter()
            .position(|h| h.contains("mail"))
            .unwrap_or_else(|| usize::from(headers.len() > 1));

        let name = lowered
            .iter()
            .position(|h| h == "name" || h == "nome")
            .or_else(|| email.checked_sub(1));

        Self { email, name }
    }
}

impl ContactTable {
    /// Read a CSV file, stripping a leading byte order mark and tolerating
    /// ragged rows and stray quotes.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be read or has no header row.
    pub fn load(path: &Path) -> Result<Self, ContactsError> {
        let content = fs::read_to_string(path).map_err(|source| ContactsError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        Self::parse(path, content.trim_start_matches('\u{feff}'))
    }

    fn parse(path: &Path, content: &str) -> Result<Self, ContactsError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(content.as_bytes());

        let mut records = reader.records();

        let headers = match records.next() {
            Some(record) => record
                .map_err(|source| ContactsError::Csv {
                    path: path.to_path_buf(),
                    source,
                })?
                .iter()
                .map(|h| h.trim().trim_matches('"').trim().to_string())
                .collect(),
            None => return Err(ContactsError::MissingHeader(path.to_path_buf())),
        };

        let mut rows = Vec::new();
        for record in records {
            let record = record.map_err(|source| ContactsError::Csv {
                path: path.to_path_buf(),
                source,
            })?;

            if record.iter().all(|cell| cell.trim().is_empty()) {
                continue;
            }
            rows.push(record.iter().map(ToString::to_string).collect());
        }

        Ok(Self { headers, rows })
    }

    #[must_use]
    pub fn columns(&self) -> ColumnMap {
        ColumnMap::detect(&self.headers)
    }

    /// Contacts in file order. Rows without an email are skipped and blank
    /// names become `placeholder_name`.
    #[must_use]
    pub fn contacts(&self, placeholder_name: &str) -> Vec<Contact> {
        let columns = self.columns();

        self.rows
            .iter()
            .filter_map(|row| {
                let email = row.get(columns.email).map_or("", |e| e.trim());
                if email.is_empty() {
                    return None;
                }

                let name = columns
                    .name
                    .filter(|&n| n != columns.email)
                    .and_then(|n| row.get(n))
                    .map_or("", |n| n.trim());

                Some(Contact::new(
                    if name.is_empty() { placeholder_name } else { name },
                    email,
                ))
            })
            .collect()
    }
}

/// Read the contacts of a CSV file.
///
/// # Errors
///
/// See [`ContactTable::load`].
pub fn read_contacts(path: &Path, placeholder_name: &str) -> Result<Vec<Contact>, ContactsError> {
    Ok(ContactTable::load(path)?.contacts(placeholder_name))
}

fn create_writer(path: &Path) -> Result<csv::Writer<fs::File>, ContactsError> {
    let write_error = |source| ContactsError::Write {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(write_error)?;
    }

    let file = fs::File::create(path).map_err(write_error)?;
    Ok(csv::WriterBuilder::new().flexible(true).from_writer(file))
}

fn write_rows<I, R>(path: &Path, header: &[&str], rows: I) -> Result<(), ContactsError>
where
    I: IntoIterator<Item = R>,
    R: IntoIterator,
    R::Item: AsRef<[u8]>,
{
    let csv_error = |source| ContactsError::Csv {
        path: path.to_path_buf(),
        source,
    };

    let mut writer = create_writer(path)?;
    writer.write_record(header).map_err(csv_error)?;
    for row in rows {
        writer.write_record(row).map_err(csv_error)?;
    }

    writer.flush().map_err(|source| ContactsError::Write {
        path: path.to_path_buf(),
        source,
    })
}

/// Write a table back out with its own header.
///
/// # Errors
///
/// Fails if the file or its parent directory cannot be created or written.
pub fn write_table(path: &Path, table: &ContactTable) -> Result<(), ContactsError> {
    let header: Vec<&str> = table.headers.iter().map(String::as_str).collect();
    write_rows(path, &header, &table.rows)
}

/// Write contacts with a `name,email` header.
///
/// # Errors
///
/// Fails if the file or its parent directory cannot be created or written.
pub fn write_contacts(path: &Path, contacts: &[Contact]) -> Result<(), ContactsError> {
    write_rows(
        path,
        &CONTACTS_HEADER,
        contacts.iter().map(|c| [c.name.as_str(), c.email.as_str()]),
    )
}

/// Write rejected contacts with a `name,email,reason,detail` header.
///
/// # Errors
///
/// See [`write_contacts`].
pub fn write_rejections(path: &Path, rejections: &[RejectionRecord]) -> Result<(), ContactsError> {
    write_rows(
        path,
        &REJECTIONS_HEADER,
        rejections.iter().map(|r| {
            [
                r.contact.name.as_str(),
                r.contact.email.as_str(),
                r.reason.as_str(),
                r.detail.as_deref().unwrap_or_default(),
            ]
        }),
    )
}

/// Write contacts with one extra annotation column, e.g. a discard reason.
///
/// # Errors
///
/// See [`write_contacts`].
pub fn write_annotated(
    path: &Path,
    column: &str,
    rows: &[(Contact, String)],
) -> Result<(), ContactsError> {
    write_rows(
        path,
        &["name", "email", column],
        rows.iter()
            .map(|(c, note)| [c.name.as_str(), c.email.as_str(), note.as_str()]),
    )
}

/// Write the full reputation report.
///
/// # Errors
///
/// See [`write_contacts`].
pub fn write_reputation_report(path: &Path, rows: &[ReputationRow]) -> Result<(), ContactsError> {
    write_rows(
        path,
        &REPUTATION_HEADER,
        rows.iter().map(|r| {
            [
                r.contact.name.clone(),
                r.contact.email.clone(),
                r.result.clone(),
                r.status_text.clone(),
                r.substatus_text.clone(),
                r.is_disposable.to_string(),
                r.is_role.to_string(),
                r.is_free.to_string(),
            ]
        }),
    )
}

/// File name without directory or extension, for naming derived outputs.
#[must_use]
pub fn base_name(path: &Path) -> String {
    path.file_stem()
        .map_or_else(|| "contacts".to_string(), |s| s.to_string_lossy().into_owned())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use mailrun_validation::RejectionReason;
    use pretty_assertions::assert_eq;

    use super::*;

    fn table(content: &str) -> ContactTable {
        ContactTable::parse(Path::new("test.csv"), content).unwrap()
    }

    #[test]
    fn test_detect_columns() {
        let headers = |h: &[&str]| h.iter().map(ToString::to_string).collect::<Vec<_>>();

        assert_eq!(
            ColumnMap::detect(&headers(&["Nome", "E_MAIL_CASA"])),
            ColumnMap { email: 1, name: Some(0) }
        );
        assert_eq!(
            ColumnMap::detect(&headers(&["email", "phone", "name"])),
            ColumnMap { email: 0, name: Some(2) }
        );
        assert_eq!(
            ColumnMap::detect(&headers(&["id", "who", "where"])),
            ColumnMap { email: 1, name: Some(0) }
        );
        assert_eq!(
            ColumnMap::detect(&headers(&["address"])),
            ColumnMap { email: 0, name: None }
        );
    }

    #[test]
    fn test_contacts_placeholder_and_skip() {
        let table = table("name,email\nAna, ana@example.com \n,bob@example.com\nNo Email,\n\n");

        assert_eq!(
            table.contacts("customer"),
            vec![
                Contact::new("Ana", "ana@example.com"),
                Contact::new("customer", "bob@example.com"),
            ]
        );
    }

    #[test]
    fn test_load_strips_bom() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bom.csv");
        fs::write(&path, "\u{feff}email,name\nx@y.com,X\n").unwrap();

        let contacts = read_contacts(&path, "customer").unwrap();
        assert_eq!(contacts, vec![Contact::new("X", "x@y.com")]);
    }

    #[test]
    fn test_empty_file_has_no_header() {
        let result = ContactTable::parse(Path::new("empty.csv"), "");
        assert!(matches!(result, Err(ContactsError::MissingHeader(_))));
    }

    #[test]
    fn test_write_contacts_and_rejections() {
        let dir = tempfile::tempdir().unwrap();
        let contacts_path = dir.path().join("out/admitted.csv");
        let rejected_path = dir.path().join("out/rejected.csv");

        write_contacts(&contacts_path, &[Contact::new("Silva, Ana", "ana@example.com")]).unwrap();
        write_rejections(
            &rejected_path,
            &[RejectionRecord {
                contact: Contact::new("B", "b@bad.invalid"),
                reason: RejectionReason::DomainUnreachable,
                detail: Some("Domain does not exist: bad.invalid".to_string()),
            }],
        )
        .unwrap();

        assert_eq!(
            fs::read_to_string(&contacts_path).unwrap(),
            "name,email\n\"Silva, Ana\",ana@example.com\n"
        );
        assert_eq!(
            fs::read_to_string(&rejected_path).unwrap(),
            "name,email,reason,detail\nB,b@bad.invalid,DOMAIN_UNREACHABLE,Domain does not exist: bad.invalid\n"
        );

        // Written files read back unchanged
        assert_eq!(
            read_contacts(&contacts_path, "customer").unwrap(),
            vec![Contact::new("Silva, Ana", "ana@example.com")]
        );
    }

    #[test]
    fn test_base_name() {
        assert_eq!(base_name(Path::new("data/march list.csv")), "march list");
    }
}
