//! Contact list cleaning.
//!
//! Normalises names and addresses exported from CRMs, drops rows that
//! cannot be mailed or addressed by name, and removes repeated addresses.

use ahash::AHashSet;
use mailrun_common::Contact;
use unicode_normalization::{UnicodeNormalization, char::is_combining_mark};

use super::ContactTable;

/// Options for [`clean_table`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanOptions {
    /// Strip hyphens from addresses. Hyphens are valid in addresses, so this
    /// is only for lists known to carry export artefacts.
    pub remove_hyphens: bool,
}

/// Result of cleaning one table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanSummary {
    /// Cleaned, unique contacts in file order.
    pub contacts: Vec<Contact>,
    /// Data rows read.
    pub read: usize,
    /// Rows dropped for an unusable name or address.
    pub dropped: usize,
    /// Rows dropped as repeats of an earlier address.
    pub duplicates: usize,
}

/// Strip diacritics and punctuation from a name.
///
/// Keeps ASCII letters, digits, whitespace, `.` and `-`; whitespace runs become a
/// single space and hyphen runs a single hyphen.
#[must_use]
pub fn clean_name(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut previous: Option<char> = None;

    for c in raw.nfd().filter(|c| !is_combining_mark(*c)) {
        let c = if c.is_whitespace() { ' ' } else { c };
        if !(c.is_ascii_alphanumeric() || c == ' ' || c == '.' || c == '-') {
            continue;
        }
        if (c == ' ' || c == '-') && previous == Some(c) {
            continue;
        }
        out.push(c);
        previous = Some(c);
    }

    out.trim().to_string()
}

/// Normalise an address: lower-case, unquote, drop whitespace and anything
/// other than alphanumerics and `@ . + - _`.
#[must_use]
pub fn clean_email(raw: &str, remove_hyphens: bool) -> String {
    raw.trim()
        .to_lowercase()
        .trim_matches('"')
        .chars()
        .filter(|c| !c.is_whitespace())
        .filter(|c| !(remove_hyphens && *c == '-'))
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '@' | '.' | '+' | '-' | '_'))
        .collect()
}

/// A name that starts with `.`, `-` or a digit is an export artefact
/// rather than a person.
fn is_usable_name(name: &str) -> bool {
    name.chars()
        .next()
        .is_some_and(|c| !(c == '.' || c == '-' || c.is_ascii_digit()))
}

/// Clean every row of `table`.
#[must_use]
pub fn clean_table(table: &ContactTable, options: CleanOptions) -> CleanSummary {
    let columns = table.columns();
    let mut summary = CleanSummary {
        read: table.rows.len(),
        ..CleanSummary::default()
    };
    let mut seen = AHashSet::new();

    for row in &table.rows {
        let raw_name = columns.name.and_then(|n| row.get(n)).map_or("", String::as_str);

        // Misaligned rows: take the first cell that looks like an address
        let raw_email = row
            .get(columns.email)
            .filter(|cell| cell.contains('@'))
            .or_else(|| row.iter().find(|cell| cell.contains('@')))
            .map_or("", String::as_str);

        let name = clean_name(raw_name);
        let email = clean_email(raw_email, options.remove_hyphens);

        if !is_usable_name(&name) || !email.contains('@') {
            summary.dropped += 1;
            continue;
        }

        if !seen.insert(email.clone()) {
            summary.duplicates += 1;
            continue;
        }

        summary.contacts.push(Contact::new(name, email));
    }

    summary
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_clean_name() {
        assert_eq!(clean_name("  José   da Conceição "), "Jose da Conceicao");
        assert_eq!(clean_name("Ana--Maria (VIP)\t"), "Ana-Maria VIP");
        assert_eq!(clean_name("o'brien_jr"), "obrienjr");
        assert_eq!(clean_name("***"), "");
    }

    #[test]
    fn test_clean_name_drops_letters_without_ascii_base() {
        assert_eq!(clean_name("Øyvind Straße"), "yvind Strae");
        assert_eq!(clean_name("Łukasz"), "ukasz");
    }

    #[test]
    fn test_clean_email() {
        assert_eq!(clean_email(" \"Ana.Silva@Example.COM\" ", false), "ana.silva@example.com");
        assert_eq!(clean_email("an a@exa mple.com;", false), "ana@example.com");
        assert_eq!(clean_email("first-last+tag@my-domain.com", false), "first-last+tag@my-domain.com");
        assert_eq!(clean_email("first-last@my-domain.com", true), "firstlast@mydomain.com");
    }

    #[test]
    fn test_usable_name() {
        assert!(is_usable_name("Ana"));
        assert!(!is_usable_name(""));
        assert!(!is_usable_name(".net"));
        assert!(!is_usable_name("-"));
        assert!(!is_usable_name("123 Company"));
    }

    #[test]
    fn test_clean_table() {
        let table = ContactTable {
            headers: vec!["Nome".to_string(), "E_MAIL_CASA".to_string()],
            rows: vec![
                vec!["Ana".to_string(), "ANA@example.com".to_string()],
                vec!["Bob".to_string(), "no address".to_string(), "bob@example.com".to_string()],
                vec!["Ana B".to_string(), " ana@example.com".to_string()],
                vec!["42 Corp".to_string(), "corp@example.com".to_string()],
                vec!["Carl".to_string(), "carl.example.com".to_string()],
            ],
        };

        let summary = clean_table(&table, CleanOptions::default());

        assert_eq!(
            summary.contacts,
            vec![
                Contact::new("Ana", "ana@example.com"),
                Contact::new("Bob", "bob@example.com"),
            ]
        );
        assert_eq!(summary.read, 5);
        assert_eq!(summary.dropped, 2);
        assert_eq!(summary.duplicates, 1);
    }
}
