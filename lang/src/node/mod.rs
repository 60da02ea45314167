//! Tagged AST nodes and the table that maps a node's tag to the handler that
//! converts it.

use std::{collections::BTreeMap, fmt::Display, sync::LazyLock};

use itertools::Itertools;

use crate::{compiler::Compiler, error::Error, ir};

/// A child of a node, or any value handed to [`Compiler::convert`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Nil,
    Bool(bool),
    Int(i64),
    Str(String),
    Sym(String),
    Node(Sexp),
}

impl Value {
    pub fn as_node(&self) -> Option<&Sexp> {
        match self {
            Value::Node(sexp) => Some(sexp),
            _ => None,
        }
    }

    pub fn as_sym(&self) -> Option<&str> {
        match self {
            Value::Sym(s) => Some(s),
            _ => None,
        }
    }
}

impl From<Sexp> for Value {
    fn from(sexp: Sexp) -> Self {
        Value::Node(sexp)
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Str(s) => write!(f, "{s:?}"),
            Value::Sym(s) => write!(f, ":{s}"),
            Value::Node(sexp) => write!(f, "{sexp}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sexp {
    pub tag: String,
    pub children: Vec<Value>,
    pub line: Option<usize>,
}

impl Sexp {
    pub fn new(tag: impl Into<String>, children: Vec<Value>) -> Self {
        Self {
            tag: tag.into(),
            children,
            line: None,
        }
    }

    pub fn at_line(mut self, line: usize) -> Self {
        self.line = Some(line);
        self
    }

    /// Wraps `self` in a new node with the given tag, keeping its line.
    pub fn wrap(self, tag: impl Into<String>) -> Self {
        let line = self.line;
        Self {
            tag: tag.into(),
            children: vec![Value::Node(self)],
            line,
        }
    }
}

impl Display for Sexp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.children.is_empty() {
            write!(f, "({})", self.tag)
        } else {
            write!(f, "({} {})", self.tag, self.children.iter().join(" "))
        }
    }
}

/// Builds a node: `s!(call, Value::Nil, Value::Sym("puts".into()))`.
#[macro_export]
macro_rules! s {
    ($tag:ident $(, $child:expr)* $(,)?) => {
        $crate::node::Sexp::new(
            stringify!($tag),
            vec![$(::std::convert::Into::<$crate::node::Value>::into($child)),*],
        )
    };
}

pub mod handlers;

pub type Handler = fn(&mut Compiler<'_>, &Sexp) -> Result<ir::Node, Error>;

/// Tag → handler lookup. Built once and never changed afterwards.
#[derive(Clone, Default)]
pub struct HandlerTable {
    handlers: BTreeMap<String, Handler>,
}

impl std::fmt::Debug for HandlerTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.handlers.keys()).finish()
    }
}

#[derive(Default)]
pub struct HandlerTableBuilder {
    handlers: BTreeMap<String, Handler>,
}

impl HandlerTableBuilder {
    pub fn register(mut self, tag: impl Into<String>, handler: Handler) -> Self {
        self.handlers.insert(tag.into(), handler);
        self
    }

    pub fn build(self) -> HandlerTable {
        HandlerTable {
            handlers: self.handlers,
        }
    }
}

static STANDARD: LazyLock<HandlerTable> =
    LazyLock::new(|| handlers::register(HandlerTable::builder()).build());

impl HandlerTable {
    pub fn builder() -> HandlerTableBuilder {
        HandlerTableBuilder::default()
    }

    /// The handlers for every tag the reference parser produces.
    pub fn standard() -> &'static HandlerTable {
        &STANDARD
    }

    /// Starts a builder holding everything in `self`.
    pub fn extend(&self) -> HandlerTableBuilder {
        HandlerTableBuilder {
            handlers: self.handlers.clone(),
        }
    }

    pub fn get(&self, tag: &str) -> Option<Handler> {
        self.handlers.get(tag).copied()
    }

    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_readable() {
        let sexp = s!(
            call,
            Value::Nil,
            Value::Sym("puts".to_owned()),
            s!(str, Value::Str("hi".to_owned()))
        );
        assert_eq!(sexp.to_string(), "(call nil :puts (str \"hi\"))");
    }

    #[test]
    fn wrapping_keeps_line() {
        let sexp = s!(nil).at_line(4).wrap("script");
        assert_eq!(sexp.tag, "script");
        assert_eq!(sexp.line, Some(4));
        assert_eq!(
            sexp.children[0].as_node().map(|n| n.tag.as_str()),
            Some("nil")
        );
    }

    #[test]
    fn standard_table_knows_the_roots() {
        let table = HandlerTable::standard();
        assert!(table.get("script").is_some());
        assert!(table.get("eval_expression").is_some());
        assert!(table.get("no_such_tag").is_none());
    }
}
