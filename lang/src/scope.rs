//! Rebuilding the lexical scopes around an `eval`.
//!
//! Code compiled for an eval runs as a block nested inside whatever frame
//! called eval. The frames between that call site and the enclosing method
//! are blocks themselves, so their variables are addressed by block depth,
//! while the method at the root of the chain owns a flat set of slots.

use std::{collections::BTreeMap, rc::Rc};

use derive_more::derive::{From, Into};
use typed_index_collections::TiVec;

use crate::node::Value;

/// What the compiler needs to know about the method that owns a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodInfo {
    pub name: String,
    pub local_names: Vec<String>,
}

impl MethodInfo {
    pub fn new<S: Into<String>>(
        name: impl Into<String>,
        locals: impl IntoIterator<Item = S>,
    ) -> Self {
        Self {
            name: name.into(),
            local_names: locals.into_iter().map(Into::into).collect(),
        }
    }
}

/// One frame of variable bindings in a live call chain.
#[derive(Debug, Clone, Default)]
pub struct Frame {
    pub parent: Option<Box<Frame>>,
    pub method: Option<Rc<MethodInfo>>,
    pub dynamic_locals: BTreeMap<String, Value>,
}

impl Frame {
    pub fn root(method: Rc<MethodInfo>) -> Self {
        Self {
            parent: None,
            method: Some(method),
            dynamic_locals: BTreeMap::new(),
        }
    }

    /// A frame nested inside `self`.
    pub fn nest(self, method: Rc<MethodInfo>) -> Self {
        Self {
            parent: Some(Box::new(self)),
            method: Some(method),
            dynamic_locals: BTreeMap::new(),
        }
    }

    fn local_names(&self) -> &[String] {
        self.method
            .as_deref()
            .map(|m| m.local_names.as_slice())
            .unwrap_or_default()
    }
}

/// The environment an eval is compiled against.
#[derive(Debug, Clone)]
pub struct EvalContext {
    pub variables: Frame,
    pub method: Rc<MethodInfo>,
}

impl EvalContext {
    pub fn new(variables: Frame, method: Rc<MethodInfo>) -> Self {
        Self { variables, method }
    }

    pub fn dynamic_locals(&self) -> &BTreeMap<String, Value> {
        &self.variables.dynamic_locals
    }

    pub fn set_eval_local(&mut self, name: impl Into<String>, value: Value) {
        self.variables.dynamic_locals.insert(name.into(), value);
    }
}

#[derive(From, Into, Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeIndex(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariableSlot {
    /// Flat slot in the method at the root of the chain.
    Slot(usize),
    /// Position among the variables created in a block frame.
    Block(usize),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScopeDescriptor {
    pub from_eval: bool,
    variables: Vec<(String, VariableSlot)>,
}

impl ScopeDescriptor {
    fn from_eval() -> Self {
        Self {
            from_eval: true,
            variables: vec![],
        }
    }

    pub fn variables(&self) -> &[(String, VariableSlot)] {
        &self.variables
    }

    pub fn lookup(&self, name: &str) -> Option<VariableSlot> {
        self.variables
            .iter()
            .find_map(|(n, slot)| (n == name).then_some(*slot))
    }
}

/// The rebuilt scopes for one eval.
#[derive(Debug, Clone)]
pub struct ScopeChain<'c> {
    /// Innermost first, the top scope last.
    scopes: TiVec<ScopeIndex, ScopeDescriptor>,
    /// Block scopes, outermost first.
    blocks: Vec<ScopeIndex>,
    top: ScopeIndex,
    context: &'c EvalContext,
}

impl<'c> ScopeChain<'c> {
    pub fn top(&self) -> &ScopeDescriptor {
        &self.scopes[self.top]
    }

    pub fn blocks(&self) -> impl ExactSizeIterator<Item = &ScopeDescriptor> + '_ {
        self.blocks.iter().map(|idx| &self.scopes[*idx])
    }

    pub fn all(&self) -> &[ScopeDescriptor] {
        &self.scopes.raw
    }

    pub fn context(&self) -> &'c EvalContext {
        self.context
    }

    /// Finds `name`, innermost scope first. The returned depth counts scopes
    /// outward from the evaluated code, which is itself depth 0.
    pub fn resolve(&self, name: &str) -> Option<(usize, VariableSlot)> {
        self.scopes
            .iter()
            .enumerate()
            .find_map(|(i, scope)| scope.lookup(name).map(|slot| (i + 1, slot)))
    }
}

pub fn build_scopes(context: &EvalContext) -> ScopeChain<'_> {
    let mut scopes: TiVec<ScopeIndex, ScopeDescriptor> = TiVec::new();
    let mut blocks = vec![];

    let mut vars = &context.variables;
    while let Some(parent) = vars.parent.as_deref() {
        let mut scope = ScopeDescriptor::from_eval();
        for (i, name) in vars.local_names().iter().enumerate() {
            scope.variables.push((name.clone(), VariableSlot::Block(i)));
        }
        blocks.insert(0, scopes.push_and_get_key(scope));
        vars = parent;
    }

    let mut top = ScopeDescriptor::from_eval();
    for (i, name) in vars.local_names().iter().enumerate() {
        top.variables.push((name.clone(), VariableSlot::Slot(i)));
    }
    let top = scopes.push_and_get_key(top);

    tracing::trace!(blocks = blocks.len(), "rebuilt eval scopes");

    ScopeChain {
        scopes,
        blocks,
        top,
        context,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn method(name: &str, locals: &[&str]) -> Rc<MethodInfo> {
        Rc::new(MethodInfo::new(name, locals.iter().copied()))
    }

    fn three_frames() -> EvalContext {
        let top = method("run", &["a", "b", "c"]);
        let outer = method("run{1}", &["d"]);
        let inner = method("run{2}", &["e", "f"]);
        let frame = Frame::root(top.clone()).nest(outer).nest(inner);
        EvalContext::new(frame, top)
    }

    #[test]
    fn three_frame_chain() {
        let ctx = three_frames();
        let chain = build_scopes(&ctx);

        assert_eq!(chain.blocks().len(), 2);
        assert_eq!(chain.all().len(), 3);
        assert!(chain.all().iter().all(|s| s.from_eval));

        let blocks: Vec<_> = chain.blocks().collect();
        // outermost block first
        assert_eq!(
            blocks[0].variables(),
            &[("d".to_owned(), VariableSlot::Block(0))]
        );
        assert_eq!(
            blocks[1].variables(),
            &[
                ("e".to_owned(), VariableSlot::Block(0)),
                ("f".to_owned(), VariableSlot::Block(1)),
            ]
        );

        assert_eq!(
            chain.top().variables(),
            &[
                ("a".to_owned(), VariableSlot::Slot(0)),
                ("b".to_owned(), VariableSlot::Slot(1)),
                ("c".to_owned(), VariableSlot::Slot(2)),
            ]
        );
        assert_eq!(chain.all().last(), Some(chain.top()));
    }

    #[test]
    fn single_frame_chain() {
        let top = method("main", &["x"]);
        let ctx = EvalContext::new(Frame::root(top.clone()), top);
        let chain = build_scopes(&ctx);

        assert_eq!(chain.blocks().len(), 0);
        assert_eq!(chain.all().len(), 1);
        assert_eq!(chain.top().lookup("x"), Some(VariableSlot::Slot(0)));
        assert!(chain.top().from_eval);
    }

    #[test]
    fn frame_without_method_contributes_empty_scope() {
        let top = method("main", &["x"]);
        let frame = Frame {
            parent: Some(Box::new(Frame::root(top.clone()))),
            method: None,
            dynamic_locals: BTreeMap::new(),
        };
        let ctx = EvalContext::new(frame, top);
        let chain = build_scopes(&ctx);

        assert_eq!(chain.blocks().len(), 1);
        assert!(chain.blocks().all(|s| s.variables().is_empty()));
        assert_eq!(chain.resolve("x"), Some((2, VariableSlot::Slot(0))));
    }

    #[test]
    fn resolve_prefers_innermost() {
        let top = method("run", &["x", "y"]);
        let frame = Frame::root(top.clone()).nest(method("run{1}", &["y"]));
        let ctx = EvalContext::new(frame, top);
        let chain = build_scopes(&ctx);

        assert_eq!(chain.resolve("y"), Some((1, VariableSlot::Block(0))));
        assert_eq!(chain.resolve("x"), Some((2, VariableSlot::Slot(0))));
        assert_eq!(chain.resolve("z"), None);
    }

    #[test]
    fn building_is_deterministic_and_leaves_context_alone() {
        let ctx = three_frames();
        let first = build_scopes(&ctx).all().to_vec();
        let second = build_scopes(&ctx).all().to_vec();
        assert_eq!(first, second);
        assert!(ctx.dynamic_locals().is_empty());
    }
}
