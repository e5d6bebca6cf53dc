use std::fmt;

/// A single diagnostic with a 1-based source location.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{line}:{column} {message}")]
pub struct ErrorDetail {
    pub line: usize,
    pub column: usize,
    pub message: String,
}

/// The error surface for both grammar compilation and parsing.
///
/// Compilation can report several diagnostics at once (duplicate
/// definitions, undefined references, left recursion); a parse failure
/// carries exactly one. Details print one per line.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Error {
    pub details: Vec<ErrorDetail>,
}

impl Error {
    pub(crate) fn single(line: usize, column: usize, message: impl Into<String>) -> Error {
        Error {
            details: vec![ErrorDetail {
                line,
                column,
                message: message.into(),
            }],
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, detail) in self.details.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{detail}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {}
