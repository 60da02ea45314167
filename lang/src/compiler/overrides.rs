//! Dynamically scoped compiler settings.
//!
//! A setting is bound for as long as a [`Scoped`] guard lives. Dropping the
//! guard, on any path, puts back exactly what was there before.

use std::{
    collections::BTreeMap,
    fmt::Display,
    ops::{Deref, DerefMut},
};

use super::Compiler;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Setting {
    Bool(bool),
    Int(i64),
    Str(String),
}

impl Setting {
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Setting::Bool(false))
    }
}

impl From<bool> for Setting {
    fn from(b: bool) -> Self {
        Setting::Bool(b)
    }
}

impl From<i64> for Setting {
    fn from(i: i64) -> Self {
        Setting::Int(i)
    }
}

impl From<&str> for Setting {
    fn from(s: &str) -> Self {
        Setting::Str(s.to_owned())
    }
}

impl From<String> for Setting {
    fn from(s: String) -> Self {
        Setting::Str(s)
    }
}

impl Display for Setting {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Setting::Bool(b) => write!(f, "{b}"),
            Setting::Int(i) => write!(f, "{i}"),
            Setting::Str(s) => f.write_str(s),
        }
    }
}

pub type Settings = BTreeMap<String, Setting>;

#[derive(Debug)]
enum Restore {
    Key { tag: String, prior: Option<Setting> },
    Snapshot(Settings),
}

/// Gives access to the compiler while a setting is bound.
pub struct Scoped<'a, 'c> {
    compiler: &'a mut Compiler<'c>,
    restore: Option<Restore>,
}

impl<'a, 'c> Scoped<'a, 'c> {
    pub(super) fn key(compiler: &'a mut Compiler<'c>, tag: String, value: Setting) -> Self {
        let prior = compiler.overrides.insert(tag.clone(), value);
        Self {
            compiler,
            restore: Some(Restore::Key { tag, prior }),
        }
    }

    pub(super) fn all(compiler: &'a mut Compiler<'c>, settings: Settings) -> Self {
        let snapshot = compiler.overrides.clone();
        compiler.overrides.extend(settings);
        Self {
            compiler,
            restore: Some(Restore::Snapshot(snapshot)),
        }
    }
}

impl<'c> Deref for Scoped<'_, 'c> {
    type Target = Compiler<'c>;

    fn deref(&self) -> &Self::Target {
        self.compiler
    }
}

impl DerefMut for Scoped<'_, '_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.compiler
    }
}

impl Drop for Scoped<'_, '_> {
    fn drop(&mut self) {
        match self.restore.take() {
            Some(Restore::Key { tag, prior }) => match prior {
                Some(value) => {
                    self.compiler.overrides.insert(tag, value);
                }
                None => {
                    self.compiler.overrides.remove(&tag);
                }
            },
            Some(Restore::Snapshot(snapshot)) => self.compiler.overrides = snapshot,
            None => {}
        }
    }
}

impl<'c> Compiler<'c> {
    pub fn get(&self, tag: &str) -> Option<&Setting> {
        self.overrides.get(tag)
    }

    pub fn is_set(&self, tag: &str) -> bool {
        self.get(tag).is_some_and(Setting::is_truthy)
    }

    /// Binds `tag` until the returned guard is dropped.
    pub fn scoped(
        &mut self,
        tag: impl Into<String>,
        value: impl Into<Setting>,
    ) -> Scoped<'_, 'c> {
        Scoped::key(self, tag.into(), value.into())
    }

    /// Merges `settings` in until the returned guard is dropped, then restores
    /// the whole table as it was.
    pub fn scoped_all(&mut self, settings: Settings) -> Scoped<'_, 'c> {
        Scoped::all(self, settings)
    }

    /// Runs `work` with `tag` bound.
    pub fn set<T>(
        &mut self,
        tag: impl Into<String>,
        value: impl Into<Setting>,
        work: impl FnOnce(&mut Compiler<'c>) -> T,
    ) -> T {
        let mut guard = self.scoped(tag, value);
        work(&mut guard)
    }

    /// Runs `work` with all of `settings` bound.
    pub fn set_all<T>(
        &mut self,
        settings: Settings,
        work: impl FnOnce(&mut Compiler<'c>) -> T,
    ) -> T {
        let mut guard = self.scoped_all(settings);
        work(&mut guard)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::Config, error::Error, generator::Assembler, node::HandlerTable};

    fn with_compiler(f: impl FnOnce(&mut Compiler<'_>)) {
        let config = Config::default();
        let mut c = Compiler::new(&config, HandlerTable::standard(), Assembler::boxed);
        f(&mut c)
    }

    #[test]
    fn failing_work_restores_unbound() {
        with_compiler(|c| {
            let res: Result<(), Error> = c.set("privately", true, |c| {
                assert!(c.is_set("privately"));
                Err(Error::Unresolved {
                    tag: "x".to_owned(),
                })
            });
            assert!(res.is_err());
            assert_eq!(c.get("privately"), None);
        });
    }

    #[test]
    fn failing_work_restores_prior_value() {
        with_compiler(|c| {
            c.set("depth", 1i64, |c| {
                let res: Result<(), Error> = c.set("depth", 2i64, |c| {
                    assert_eq!(c.get("depth"), Some(&Setting::Int(2)));
                    Err(Error::Unresolved {
                        tag: "x".to_owned(),
                    })
                });
                assert!(res.is_err());
                assert_eq!(c.get("depth"), Some(&Setting::Int(1)));
            });
            assert_eq!(c.get("depth"), None);
        });
    }

    #[test]
    fn bulk_and_single_nest() {
        with_compiler(|c| {
            c.set("a", "outer", |c| {
                let settings = Settings::from([
                    ("a".to_owned(), Setting::from("bulk")),
                    ("b".to_owned(), Setting::from(true)),
                ]);
                c.set_all(settings, |c| {
                    assert_eq!(c.get("a"), Some(&Setting::from("bulk")));
                    c.set("b", false, |c| {
                        assert!(!c.is_set("b"));
                        assert!(c.get("b").is_some());
                    });
                    assert!(c.is_set("b"));
                });
                assert_eq!(c.get("a"), Some(&Setting::from("outer")));
                assert_eq!(c.get("b"), None);
            });
        });
    }

    #[test]
    fn guard_restores_on_drop() {
        with_compiler(|c| {
            {
                let guard = c.scoped("eval", true);
                assert!(guard.is_set("eval"));
            }
            assert!(!c.is_set("eval"));
        });
    }

    #[test]
    fn guard_restores_during_unwind() {
        let config = Config::default();
        let mut c = Compiler::new(&config, HandlerTable::standard(), Assembler::boxed);
        let res = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            c.set("eval", true, |_| panic!("handler blew up"));
        }));
        assert!(res.is_err());
        assert_eq!(c.get("eval"), None);
    }
}
