#[macro_use]
pub mod node;

pub mod compiler;
pub mod config;
pub mod error;
pub mod generator;
pub mod ir;
pub mod literate;
pub mod parser;
pub mod plugin;
pub mod scope;
pub mod version;

pub use compiler::{compile_file, compile_source, compile_string, CompileOptions, Compiler};
pub use config::{Config, ConfigStore};
pub use error::{Diagnostic, Error, ErrorKind};
pub use generator::Method;
