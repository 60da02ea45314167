//! Turns parsed nodes into methods.

use std::path::Path;

use crate::{
    config::{Config, ConfigStore},
    error::{Diagnostic, Error},
    generator::{Assembler, Generator, GeneratorFactory, Method},
    ir::{self, Local},
    literate::{is_literate_path, LiterateSource},
    node::{HandlerTable, Sexp, Value},
    parser,
    plugin::{PluginId, PluginRegistry},
    scope::{build_scopes, EvalContext, ScopeChain, VariableSlot},
};

mod overrides;

pub use overrides::{Scoped, Setting, Settings};

/// Method name given to top-level scripts.
pub const SCRIPT_NAME: &str = "__script__";
/// Method name given to evaluated strings.
pub const EVAL_NAME: &str = "__eval_script__";

/// Settings the standard handlers bind while converting.
pub mod settings {
    /// Bound while converting the body of an eval.
    pub const EVAL: &str = "eval";
    /// Bound inside a `privately` form; every send becomes private.
    pub const PRIVATELY: &str = "privately";
}

pub struct Compiler<'c> {
    config: &'c Config,
    handlers: &'c HandlerTable,
    context: Option<&'c EvalContext>,
    scopes: Option<ScopeChain<'c>>,
    generator: GeneratorFactory,
    plugins: PluginRegistry,

    overrides: Settings,
    locals: Vec<String>,
    /// Names assigned for the first time inside an eval.
    dynamic: Vec<String>,

    file: Option<String>,
    line: Option<usize>,
    trail: Vec<String>,
    failed_trail: Option<Vec<String>>,
    diagnostics: Vec<Diagnostic>,
}

impl std::fmt::Debug for Compiler<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("#<Compiler>")
    }
}

impl<'c> Compiler<'c> {
    pub fn new(
        config: &'c Config,
        handlers: &'c HandlerTable,
        generator: GeneratorFactory,
    ) -> Self {
        Self {
            config,
            handlers,
            context: None,
            scopes: None,
            generator,
            plugins: PluginRegistry::load(config),
            overrides: Settings::new(),
            locals: vec![],
            dynamic: vec![],
            file: None,
            line: None,
            trail: vec![],
            failed_trail: None,
            diagnostics: vec![],
        }
    }

    /// Compiles against the variables visible from `context`.
    pub fn with_context(mut self, context: &'c EvalContext) -> Self {
        self.context = Some(context);
        self.scopes = Some(build_scopes(context));
        self
    }

    pub fn config(&self) -> &'c Config {
        self.config
    }

    pub fn kernel(&self) -> bool {
        self.config.kernel()
    }

    pub fn custom_scopes(&self) -> bool {
        self.context.is_some()
    }

    pub fn context(&self) -> Option<&'c EvalContext> {
        self.context
    }

    /// Rebuilds the scopes around the eval context, if there is one.
    pub fn create_scopes(&self) -> Option<ScopeChain<'c>> {
        self.context.map(build_scopes)
    }

    pub fn scopes(&self) -> Option<&ScopeChain<'c>> {
        self.scopes.as_ref()
    }

    pub fn plugins(&self) -> &PluginRegistry {
        &self.plugins
    }

    pub fn activate(&mut self, id: PluginId) {
        self.plugins.activate(id)
    }

    pub fn activate_named(&mut self, name: &str) -> Result<(), Error> {
        self.plugins.activate_named(name)
    }

    pub fn generator_class(&self) -> GeneratorFactory {
        self.generator
    }

    pub fn set_generator_class(&mut self, generator: GeneratorFactory) {
        self.generator = generator;
    }

    pub fn new_generator(&self) -> Box<dyn Generator> {
        (self.generator)()
    }

    pub fn set_position(&mut self, file: Option<&str>, line: Option<usize>) {
        self.file = file.map(str::to_owned);
        self.line = line;
    }

    pub fn current_file(&self) -> Option<&str> {
        self.file.as_deref()
    }

    pub fn current_line(&self) -> Option<usize> {
        self.line
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// Converts any value. `Nil` converts to nothing; anything else that is
    /// not a node is rejected.
    pub fn convert(&mut self, value: &Value) -> Result<Option<ir::Node>, Error> {
        match value {
            Value::Nil => Ok(None),
            Value::Node(sexp) => self.convert_node(sexp).map(Some),
            other => Err(Error::NotANode {
                value: other.to_string(),
            }),
        }
    }

    pub fn convert_node(&mut self, sexp: &Sexp) -> Result<ir::Node, Error> {
        if sexp.line.is_some() {
            self.line = sexp.line;
        }
        let Some(handler) = self.handlers.get(&sexp.tag) else {
            self.note_failure(&sexp.tag);
            return Err(Error::Unresolved {
                tag: sexp.tag.clone(),
            });
        };
        tracing::trace!(tag = %sexp.tag, line = ?sexp.line, "convert");

        self.trail.push(sexp.tag.clone());
        let res = handler(self, sexp);
        if res.is_err() && self.failed_trail.is_none() {
            self.failed_trail = Some(self.trail.clone());
        }
        self.trail.pop();
        res
    }

    fn note_failure(&mut self, tag: &str) {
        if self.failed_trail.is_none() {
            let mut trail = self.trail.clone();
            trail.push(tag.to_owned());
            self.failed_trail = Some(trail);
        }
    }

    /// Converts `sexp` as a whole script. Failures do not escape: they are
    /// reported and recorded in [`Self::diagnostics`], and no node comes back.
    pub fn into_script(&mut self, sexp: Sexp) -> Option<ir::Node> {
        self.failed_trail = None;
        match self.convert_node(&sexp.wrap("script")) {
            Ok(node) => Some(node),
            Err(e) => {
                self.report(&e);
                None
            }
        }
    }

    /// Records a diagnostic for `error` at the current position.
    pub fn report(&mut self, error: &Error) -> Diagnostic {
        let (file, line) = match error {
            Error::Generation(g) if g.file.is_some() || g.line.is_some() => {
                (g.file.as_deref(), g.line)
            }
            _ => (self.file.as_deref(), self.line),
        };
        let diagnostic = Diagnostic::new(error, file, line)
            .with_trail(self.failed_trail.take().unwrap_or_default());
        tracing::error!("{diagnostic}");
        self.diagnostics.push(diagnostic.clone());
        diagnostic
    }

    /// Offers a call site to the active plugins, falling back to a plain send.
    pub fn call(&self, call: ir::Call) -> ir::Node {
        self.plugins
            .rewrite(call, &self.overrides)
            .unwrap_or_else(ir::Node::Send)
    }

    pub fn local_count(&self) -> usize {
        self.locals.len()
    }

    /// Finds a variable visible from the code being compiled.
    pub fn lookup_local(&self, name: &str) -> Option<Local> {
        if let Some(slot) = self.locals.iter().position(|l| l == name) {
            return Some(Local::Slot(slot));
        }
        if let Some(scopes) = &self.scopes {
            if let Some((depth, slot)) = scopes.resolve(name) {
                let (VariableSlot::Slot(index) | VariableSlot::Block(index)) = slot;
                return Some(Local::Captured { depth, index });
            }
            if scopes.context().dynamic_locals().contains_key(name) {
                return Some(Local::Dynamic(name.to_owned()));
            }
        }
        if self.dynamic.iter().any(|d| d == name) {
            return Some(Local::Dynamic(name.to_owned()));
        }
        None
    }

    /// Creates a new variable. Inside an eval new variables live in the eval
    /// context rather than in the evaluated block.
    pub fn declare_local(&mut self, name: &str) -> Local {
        if self.is_set(settings::EVAL) {
            if !self.dynamic.iter().any(|d| d == name) {
                self.dynamic.push(name.to_owned());
            }
            return Local::Dynamic(name.to_owned());
        }
        self.locals.push(name.to_owned());
        Local::Slot(self.locals.len() - 1)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CompileOptions {
    /// Treat the input as literate regardless of its extension.
    pub lrb: bool,
    /// Keep prose as comments when extracting literate sources.
    pub comments: bool,
}

fn report_outside(error: Error, file: &str, line: Option<usize>) -> Diagnostic {
    let line = match &error {
        Error::Syntax(e) => Some(e.line),
        _ => line,
    };
    let diagnostic = Diagnostic::new(&error, Some(file), line);
    tracing::error!("{diagnostic}");
    diagnostic
}

/// Compiles the file at `path`. `flags` are set on top of `store` for this
/// compilation only.
pub fn compile_file<S: AsRef<str>>(
    path: &Path,
    flags: &[S],
    options: &CompileOptions,
    store: &ConfigStore,
) -> Result<Method, Diagnostic> {
    let file = path.display().to_string();
    let _span = tracing::info_span!("compile_file", file = %file).entered();

    let mut store = store.clone();
    store.process_flags(flags);
    let config = store.freeze();

    let source = if options.lrb || is_literate_path(path) {
        tracing::debug!(comments = options.comments, "extracting literate source");
        LiterateSource::open(path)
            .map_err(|e| report_outside(e, &file, None))?
            .to_code(options.comments)
    } else {
        std::fs::read_to_string(path)
            .map_err(|source| Error::Io {
                path: path.to_owned(),
                source,
            })
            .map_err(|e| report_outside(e, &file, None))?
    };

    compile_source(&source, &file, &config)
}

/// Compiles `source` as a top-level script.
pub fn compile_source(source: &str, file: &str, config: &Config) -> Result<Method, Diagnostic> {
    let _span = tracing::info_span!("compile_source", file).entered();
    let sexp = parser::parse(source, file, 1)
        .map_err(|e| report_outside(e.into(), file, None))?;

    let mut comp = Compiler::new(config, HandlerTable::standard(), Assembler::boxed);
    comp.set_position(Some(file), sexp.line);

    let Some(node) = comp.into_script(sexp) else {
        return Err(comp.diagnostics.pop().unwrap_or_else(|| {
            report_outside(Error::malformed("script", "no method produced"), file, None)
        }));
    };

    let mut desc = node.to_description(SCRIPT_NAME);
    desc.file = Some(file.to_owned());
    desc.to_executable(comp.new_generator())
        .map_err(|e| comp.report(&e))
}

/// Compiles `source` as a block to run inside `binding`.
pub fn compile_string(
    source: &str,
    binding: &EvalContext,
    file: &str,
    line: usize,
    config: &Config,
) -> Result<Method, Error> {
    let _span = tracing::info_span!("compile_string", file, line).entered();
    let sexp = parser::parse(source, file, line)?;

    let mut comp =
        Compiler::new(config, HandlerTable::standard(), Assembler::boxed).with_context(binding);
    comp.set_position(Some(file), Some(line));
    let node = comp.convert_node(&sexp.wrap("eval_expression"))?;

    let mut desc = node.to_description(EVAL_NAME);
    desc.for_block = true;
    desc.file = Some(file.to_owned());
    desc.to_executable(comp.new_generator())
}
