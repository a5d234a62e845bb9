use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryPathError {
    /// A component contained control characters or could not be represented.
    UnrepresentableName,
    /// The stored name sanitized down to nothing.
    EmptyPath,
}

impl std::error::Error for EntryPathError {}

impl fmt::Display for EntryPathError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl EntryPathError {
    pub fn as_str(&self) -> &str {
        match self {
            EntryPathError::UnrepresentableName => "unrepresentable string found in stored name",
            EntryPathError::EmptyPath => "stored name is empty after sanitization",
        }
    }

    pub fn as_io_error(&self) -> std::io::Error {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, self.as_str())
    }
}
