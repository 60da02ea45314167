//! Literate sources: prose with code either fenced between `\begin{code}` and
//! `\end{code}` or quoted line by line with a leading `>`.

use std::{
    fs::File,
    io::{BufRead, BufReader},
    path::Path,
};

use itertools::Itertools;

use crate::error::Error;

/// File suffix that switches on literate extraction.
pub const LITERATE_EXTENSION: &str = "lscm";

const BEGIN_CODE: &str = "\\begin{code}";
const END_CODE: &str = "\\end{code}";
const QUOTE_MARKER: char = '>';
const COMMENT_MARKER: &str = "#";

/// The two halves of a literate document. At every position exactly one of
/// `code` and `comments` holds a line.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LiterateSource {
    code: Vec<Option<String>>,
    comments: Vec<Option<String>>,
}

enum Line<'a> {
    Quoted(&'a str),
    BeginCode,
    EndCode,
    Plain(&'a str),
}

fn classify(line: &str) -> Line<'_> {
    let trimmed = line.trim_start();
    if let Some(rest) = trimmed.strip_prefix(QUOTE_MARKER) {
        return Line::Quoted(rest);
    }
    match trimmed.trim_end() {
        BEGIN_CODE => Line::BeginCode,
        END_CODE => Line::EndCode,
        _ => Line::Plain(line),
    }
}

impl LiterateSource {
    pub fn open(path: &Path) -> Result<Self, Error> {
        let file = File::open(path).map_err(|source| Error::Io {
            path: path.to_owned(),
            source,
        })?;
        Self::from_reader(BufReader::new(file)).map_err(|source| Error::Io {
            path: path.to_owned(),
            source,
        })
    }

    /// Reads the document line by line.
    pub fn from_reader(mut reader: impl BufRead) -> std::io::Result<Self> {
        let mut res = Self::default();
        let mut in_code = false;
        let mut buf = String::new();

        loop {
            buf.clear();
            if reader.read_line(&mut buf)? == 0 {
                break;
            }
            let line = buf.trim_end_matches(['\n', '\r']);
            match classify(line) {
                Line::Quoted(code) => res.push_code(code),
                Line::BeginCode => in_code = true,
                Line::EndCode => in_code = false,
                Line::Plain(line) if in_code => res.push_code(line),
                Line::Plain(line) => res.push_comment(line),
            }
        }

        Ok(res)
    }

    fn push_code(&mut self, line: &str) {
        self.code.push(Some(line.to_owned()));
        self.comments.push(None);
    }

    fn push_comment(&mut self, line: &str) {
        self.code.push(None);
        self.comments.push(Some(line.to_owned()));
    }

    pub fn code(&self) -> &[Option<String>] {
        &self.code
    }

    pub fn comments(&self) -> &[Option<String>] {
        &self.comments
    }

    /// Joins the document back into one source string. With `comments`, each
    /// non-empty prose line is kept as a source comment in its original
    /// position.
    pub fn to_code(&self, comments: bool) -> String {
        self.code
            .iter()
            .zip(self.comments.iter())
            .filter_map(|(code, comment)| match (code, comment) {
                (Some(code), _) => Some(code.clone()),
                (None, Some(comment)) if comments && !comment.is_empty() => {
                    Some(format!("{COMMENT_MARKER} {comment}"))
                }
                _ => None,
            })
            .join("\n")
    }
}

pub fn is_literate_path(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext == LITERATE_EXTENSION)
}
