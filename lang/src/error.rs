use std::{fmt::Display, path::PathBuf};

use crate::parser::ParseError;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Unknown plugin '{name}'")]
    UnknownPlugin { name: String },

    #[error("input must be a node: {value}")]
    NotANode { value: String },

    #[error("Unable to resolve '{tag}'")]
    Unresolved { tag: String },

    #[error("malformed '{tag}' node: {reason}")]
    Malformed { tag: String, reason: String },

    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error(transparent)]
    Syntax(#[from] ParseError),

    #[error("error reading {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    Type,
    Resolution,
    Malformed,
    Generation,
    Syntax,
    Io,
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::Configuration => "configuration error",
            ErrorKind::Type => "type error",
            ErrorKind::Resolution => "resolution error",
            ErrorKind::Malformed => "malformed node",
            ErrorKind::Generation => "generation error",
            ErrorKind::Syntax => "syntax error",
            ErrorKind::Io => "io error",
        };
        f.write_str(name)
    }
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::UnknownPlugin { .. } => ErrorKind::Configuration,
            Error::NotANode { .. } => ErrorKind::Type,
            Error::Unresolved { .. } => ErrorKind::Resolution,
            Error::Malformed { .. } => ErrorKind::Malformed,
            Error::Generation(_) => ErrorKind::Generation,
            Error::Syntax(_) => ErrorKind::Syntax,
            Error::Io { .. } => ErrorKind::Io,
        }
    }

    pub(crate) fn malformed(tag: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Malformed {
            tag: tag.into(),
            reason: reason.into(),
        }
    }
}

/// Raised when turning converted nodes into instructions fails. Once one of
/// these exists it is already positioned, so the generation guard passes it
/// through untouched.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct GenerationError {
    pub message: String,
    pub file: Option<String>,
    pub line: Option<usize>,
}

impl GenerationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            file: None,
            line: None,
        }
    }

    pub fn at(mut self, file: Option<&str>, line: Option<usize>) -> Self {
        self.file = file.map(str::to_owned);
        self.line = line;
        self
    }
}

/// A reported compilation failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub kind: ErrorKind,
    pub message: String,
    pub file: Option<String>,
    pub line: Option<usize>,
    /// Tags of the nodes that were being converted when the failure happened,
    /// outermost first.
    pub trail: Vec<String>,
}

impl Diagnostic {
    pub fn new(error: &Error, file: Option<&str>, line: Option<usize>) -> Self {
        Self {
            kind: error.kind(),
            message: error.to_string(),
            file: file.map(str::to_owned),
            line,
            trail: vec![],
        }
    }

    pub fn with_trail(mut self, trail: Vec<String>) -> Self {
        self.trail = trail;
        self
    }

    pub fn location(&self) -> Location<'_> {
        Location {
            file: self.file.as_deref(),
            line: self.line,
        }
    }
}

impl Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Compilation error detected: {}", self.message)?;
        write!(f, "   near {} ({})", self.location(), self.kind)?;
        for tag in self.trail.iter().rev() {
            write!(f, "\n   in {tag}")?;
        }
        Ok(())
    }
}

/// A file/line pair where either half may be unknown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Location<'a> {
    pub file: Option<&'a str>,
    pub line: Option<usize>,
}

impl Display for Location<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.file {
            Some(file) => write!(f, "{file}:")?,
            None => write!(f, "<missing file>:")?,
        }
        match self.line {
            Some(line) => write!(f, "{line}"),
            None => write!(f, "<missing line>"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_positions_are_rendered_explicitly() {
        let loc = Location {
            file: None,
            line: None,
        };
        assert_eq!(loc.to_string(), "<missing file>:<missing line>");

        let loc = Location {
            file: Some("a.scm"),
            line: None,
        };
        assert_eq!(loc.to_string(), "a.scm:<missing line>");
    }

    #[test]
    fn diagnostic_lists_trail_innermost_first() {
        let err = Error::Unresolved {
            tag: "bogus".to_owned(),
        };
        let diag = Diagnostic::new(&err, Some("x.scm"), Some(3))
            .with_trail(vec!["script".to_owned(), "bogus".to_owned()]);
        let rendered = diag.to_string();
        assert!(rendered.contains("Unable to resolve 'bogus'"));
        assert!(rendered.contains("near x.scm:3 (resolution error)"));
        let bogus = rendered.find("in bogus").unwrap();
        let script = rendered.find("in script").unwrap();
        assert!(bogus < script);
    }
}
