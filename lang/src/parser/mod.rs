//! Reads the s-expression form of the AST.

use pest::{error::LineColLocation, iterators::Pair, Parser};
use pest_derive::Parser;

use crate::node::{Sexp, Value};

#[derive(Parser)]
#[grammar = "parser/sexp.pest"]
struct SexpParser;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ParseError {
    pub file: String,
    pub line: usize,
    pub message: String,
}

/// Parses `source`, numbering its lines from `line`. A single form comes
/// back as is, several are wrapped in a `block`, and no forms at all read as
/// `(nil)`.
pub fn parse(source: &str, file: &str, line: usize) -> Result<Sexp, ParseError> {
    let factory = Factory {
        file,
        offset: line.saturating_sub(1),
    };
    let parsed = SexpParser::parse(Rule::file, source).map_err(|e| factory.syntax(e))?;

    let mut forms = vec![];
    for root in parsed {
        for pair in root.into_inner() {
            if pair.as_rule() == Rule::form {
                forms.push(factory.form(pair)?);
            }
        }
    }
    tracing::trace!(file, forms = forms.len(), "parsed");

    let mut forms = forms.into_iter();
    Ok(match (forms.next(), forms.len()) {
        (None, _) => Sexp::new("nil", vec![]).at_line(line),
        (Some(only), 0) => only,
        (Some(first), _) => {
            let first_line = first.line;
            let mut block = Sexp::new(
                "block",
                std::iter::once(first).chain(forms).map(Value::Node).collect(),
            );
            block.line = first_line;
            block
        }
    })
}

struct Factory<'a> {
    file: &'a str,
    offset: usize,
}

impl Factory<'_> {
    fn line(&self, p: &Pair<Rule>) -> usize {
        p.line_col().0 + self.offset
    }

    fn error(&self, p: &Pair<Rule>, message: impl Into<String>) -> ParseError {
        ParseError {
            file: self.file.to_owned(),
            line: self.line(p),
            message: message.into(),
        }
    }

    fn syntax(&self, e: pest::error::Error<Rule>) -> ParseError {
        let line = match e.line_col {
            LineColLocation::Pos((line, _)) | LineColLocation::Span((line, _), _) => line,
        };
        ParseError {
            file: self.file.to_owned(),
            line: line + self.offset,
            message: format!("syntax error: {}", e.variant.message()),
        }
    }

    fn form(&self, p: Pair<Rule>) -> Result<Sexp, ParseError> {
        debug_assert_eq!(p.as_rule(), Rule::form);
        let line = self.line(&p);
        let mut inner = p.into_inner();
        let Some(tag) = inner.next() else {
            return Err(ParseError {
                file: self.file.to_owned(),
                line,
                message: "empty form".to_owned(),
            });
        };
        let children = inner.map(|p| self.item(p)).collect::<Result<_, _>>()?;
        Ok(Sexp::new(tag.as_str(), children).at_line(line))
    }

    fn item(&self, p: Pair<Rule>) -> Result<Value, ParseError> {
        Ok(match p.as_rule() {
            Rule::form => Value::Node(self.form(p)?),
            Rule::nil => Value::Nil,
            Rule::boolean => Value::Bool(p.as_str() == "true"),
            Rule::int => Value::Int(
                p.as_str()
                    .parse()
                    .map_err(|e| self.error(&p, format!("bad integer {}: {e}", p.as_str())))?,
            ),
            Rule::string => Value::Str(unescape(p.as_str())),
            Rule::symbol => Value::Sym(p.as_str().trim_start_matches(':').to_owned()),
            Rule::word => Value::Sym(p.as_str().to_owned()),
            rule => return Err(self.error(&p, format!("unexpected {rule:?}"))),
        })
    }
}

fn unescape(quoted: &str) -> String {
    let inner = quoted
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(quoted);
    let mut res = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            res.push(ch);
            continue;
        }
        match chars.next() {
            Some('n') => res.push('\n'),
            Some('t') => res.push('\t'),
            Some(other) => res.push(other),
            None => {}
        }
    }
    res
}
