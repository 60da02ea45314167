//! Process-wide compiler flags.
//!
//! Flags are collected into a [`ConfigStore`] before anything is compiled and
//! then frozen into a [`Config`], which every compiler borrows. There is no
//! way back from a `Config` to a mutable store.

use std::{collections::BTreeMap, fmt::Display};

/// Prefix that marks a token as a compiler flag, e.g. `-fkernel` or
/// `-fno-fastmath`.
pub const FLAG_PREFIX: &str = "-f";

/// Enables the kernel-only plugins.
pub const KERNEL_FLAG: &str = "kernel";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlagValue {
    Bool(bool),
    Str(String),
}

impl FlagValue {
    pub fn is_truthy(&self) -> bool {
        match self {
            FlagValue::Bool(b) => *b,
            FlagValue::Str(_) => true,
        }
    }

    fn parse(raw: &str) -> Self {
        match raw {
            "true" => FlagValue::Bool(true),
            "false" => FlagValue::Bool(false),
            other => FlagValue::Str(other.to_owned()),
        }
    }
}

impl Display for FlagValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FlagValue::Bool(b) => write!(f, "{b}"),
            FlagValue::Str(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct ConfigStore {
    flags: BTreeMap<String, FlagValue>,
}

impl ConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: impl Into<String>, value: FlagValue) {
        self.flags.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<&FlagValue> {
        self.flags.get(name)
    }

    /// Sets every name to `true`.
    pub fn process_flags<S: AsRef<str>>(&mut self, names: &[S]) {
        for name in names {
            self.set(name.as_ref(), FlagValue::Bool(true));
        }
    }

    /// Pulls every `-fname[=value]` token out of `tokens` and stores it.
    /// Everything else stays where it was.
    pub fn parse_flags(&mut self, tokens: &mut Vec<String>) {
        tokens.retain(|token| {
            let Some(body) = token.strip_prefix(FLAG_PREFIX) else {
                return true;
            };
            let (name, value) = match body.split_once('=') {
                Some((name, raw)) => (name, FlagValue::parse(raw)),
                None => (body, FlagValue::Bool(true)),
            };
            tracing::debug!(flag = name, %value, "compiler flag");
            self.flags.insert(name.to_owned(), value);
            false
        });
    }

    pub fn freeze(self) -> Config {
        Config { flags: self.flags }
    }
}

/// Frozen flag table.
#[derive(Debug, Default, Clone)]
pub struct Config {
    flags: BTreeMap<String, FlagValue>,
}

impl Config {
    pub fn get(&self, name: &str) -> Option<&FlagValue> {
        self.flags.get(name)
    }

    pub fn enabled(&self, name: &str) -> bool {
        self.get(name).is_some_and(FlagValue::is_truthy)
    }

    pub fn kernel(&self) -> bool {
        self.enabled(KERNEL_FLAG)
    }

    /// Whether `no-<name>` has been set.
    pub fn suppressed(&self, name: &str) -> bool {
        self.enabled(&format!("no-{name}"))
    }
}
