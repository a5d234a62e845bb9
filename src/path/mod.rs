//! Sanitization of stored member names into safe relative paths.
//!
//! Archive members name themselves, and archives are not trustworthy: stored
//! names may carry `..` chunks, absolute prefixes, control characters or
//! mixed separators. Nothing in this crate joins a raw stored name onto a
//! destination root; it goes through [`EntryPath`] first.

use std::fmt;
use std::path::PathBuf;

mod error;

pub use self::error::EntryPathError;

/// Separators accepted in stored names. Containers written on Windows use
/// `\`, everything else uses `/`; both occur in the wild, sometimes mixed.
const STORED_SEPS: [char; 2] = ['/', '\\'];

/// A sanitized, always-relative member path.
///
/// Components are NFC-normalized, trimmed, free of control, separator and
/// drive-colon characters, and contain no `.` or `..` chunks.
#[derive(Debug, Clone, PartialOrd, Ord, PartialEq, Eq, Hash)]
pub struct EntryPath(Vec<String>);

/// Sanitize a stored name into clean path components.
///
/// Returns `None` if any component is unrepresentable. An empty result (e.g.
/// the name was `"/"` or `"../.."`) is returned as an empty vector.
pub fn sanitize(name: &str) -> Option<Vec<String>> {
    use unic_normal::StrNormalForm;
    use unic_ucd::GeneralCategory;

    let mut out: Vec<String> = vec![];

    for chunk in name.split(STORED_SEPS) {
        let chunk = chunk.trim();
        match chunk {
            "" | "." => {}
            ".." => {
                out.pop();
            }
            // A bare drive spec is a prefix, dropped like a root component.
            chunk if is_drive_prefix(chunk) => {}
            chunk => {
                // A colon anywhere else would make the joined path
                // drive-relative on Windows.
                if chunk.chars().any(|c| {
                    let cat = GeneralCategory::of(c);
                    c == ':' || cat == GeneralCategory::Control || (cat.is_separator() && c != ' ')
                }) {
                    return None;
                }
                out.push(chunk.nfc().collect::<String>());
            }
        }
    }

    Some(out)
}

impl EntryPath {
    pub fn new(name: &str) -> Result<EntryPath, EntryPathError> {
        let out = sanitize(name).ok_or(EntryPathError::UnrepresentableName)?;

        if out.is_empty() {
            return Err(EntryPathError::EmptyPath);
        }

        Ok(EntryPath(out))
    }

    #[inline(always)]
    pub fn components(&self) -> &[String] {
        &self.0
    }

    /// The last component of the path.
    pub fn file_name(&self) -> &str {
        self.0.last().expect("EntryPath is never empty")
    }

    pub fn to_path_buf(&self) -> PathBuf {
        self.0.iter().collect()
    }

    /// Just the final component, as a single-component path. Used when
    /// directory structure preservation is disabled.
    pub fn flattened(&self) -> PathBuf {
        PathBuf::from(self.file_name())
    }
}

impl fmt::Display for EntryPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut iter = self.0.iter();
        if let Some(v) = iter.next() {
            f.write_str(v)?;
        }
        for v in iter {
            f.write_str("/")?;
            f.write_str(v)?;
        }
        Ok(())
    }
}

fn is_drive_prefix(chunk: &str) -> bool {
    let mut chars = chunk.chars();
    matches!(
        (chars.next(), chars.next(), chars.next()),
        (Some(letter), Some(':'), None) if letter.is_ascii_alphabetic()
    )
}

/// Whether a stored name's basename matches the requested name. Used by
/// loose-mode selection.
pub(crate) fn basename_matches(stored: &str, wanted: &str) -> bool {
    stored
        .rsplit(STORED_SEPS)
        .next()
        .map(|base| base == wanted)
        .unwrap_or(false)
}
