//! Optional code generation strategies.
//!
//! Every plugin gets a look at each call site before it is compiled as a
//! plain send and may replace it with something cheaper.

use std::{collections::BTreeMap, fmt::Display, str::FromStr};

use crate::{
    compiler::{settings, Settings},
    config::Config,
    error::Error,
    generator::{GenericOp, Instruction, MathOp, SystemOp},
    ir::{Call, Node},
};

/// Plugins of one kind are consulted together; kinds are consulted in
/// [`PluginKind::ALL`] order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PluginKind {
    /// Evaluates call sites at compile time.
    Fold,
    /// Selects specialised instructions for call sites.
    Call,
}

impl PluginKind {
    pub const ALL: [PluginKind; 2] = [PluginKind::Fold, PluginKind::Call];
}

/// When [`PluginRegistry::load`] turns a plugin on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    /// Always, unless suppressed with `no-<name>`.
    Default,
    /// Only when building kernel code.
    Kernel,
}

macro_rules! plugins {
    {
        $(($ident:ident, $name:literal, $kind:ident, $activation:ident),)*
    } => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub enum PluginId {
            $($ident,)*
        }

        impl PluginId {
            /// In load order.
            pub const ALL: &'static [PluginId] = &[
                $(PluginId::$ident,)*
            ];

            pub fn name(self) -> &'static str {
                match self {
                    $(PluginId::$ident => $name,)*
                }
            }

            pub fn kind(self) -> PluginKind {
                match self {
                    $(PluginId::$ident => PluginKind::$kind,)*
                }
            }

            pub fn activation(self) -> Activation {
                match self {
                    $(PluginId::$ident => Activation::$activation,)*
                }
            }
        }

        impl FromStr for PluginId {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($name => Ok(PluginId::$ident),)*
                    _ => Err(Error::UnknownPlugin { name: s.to_owned() }),
                }
            }
        }
    };
}

plugins! {
    (BlockGiven, "block_given", Call, Default),
    (Primitive, "primitive", Call, Default),
    (Assembly, "assembly", Call, Default),
    (FastMath, "fastmath", Call, Default),
    (CurrentMethod, "current_method", Call, Default),
    (ConstExpr, "const_expr", Fold, Kernel),
    (KernelMethods, "kernel_methods", Call, Kernel),
    (FastSystem, "fastsystem", Call, Default),
    (FastGeneric, "fastgeneric", Call, Default),
    (Privately, "privately", Call, Default),
    (FastCoerce, "fast_coerce", Call, Kernel),
}

impl Display for PluginId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

pub trait Plugin: std::fmt::Debug {
    fn id(&self) -> PluginId;

    fn kind(&self) -> PluginKind {
        self.id().kind()
    }

    /// Rewrites `call`, or hands it back untouched.
    fn handle(&self, call: Call) -> Result<Node, Call>;

    /// Like [`Self::handle`], for plugins that depend on the compiler's
    /// current overrides.
    fn handle_with(&self, call: Call, _overrides: &Settings) -> Result<Node, Call> {
        self.handle(call)
    }
}

impl PluginId {
    fn construct(self) -> Box<dyn Plugin> {
        match self {
            PluginId::BlockGiven => Box::new(BlockGiven),
            PluginId::Primitive => Box::new(Primitive),
            PluginId::Assembly => Box::new(Assembly),
            PluginId::FastMath => Box::new(FastMath),
            PluginId::CurrentMethod => Box::new(CurrentMethod),
            PluginId::ConstExpr => Box::new(ConstExpr),
            PluginId::KernelMethods => Box::new(KernelMethods),
            PluginId::FastSystem => Box::new(FastSystem),
            PluginId::FastGeneric => Box::new(FastGeneric),
            PluginId::Privately => Box::new(Privately),
            PluginId::FastCoerce => Box::new(FastCoerce),
        }
    }
}

/// The plugins active for one compiler, grouped by kind.
#[derive(Debug, Default)]
pub struct PluginRegistry {
    active: BTreeMap<PluginKind, Vec<Box<dyn Plugin>>>,
}

impl PluginRegistry {
    /// Activates every plugin in [`PluginId::ALL`] order: the defaults
    /// unless suppressed, the kernel ones only in kernel mode.
    pub fn load(config: &Config) -> Self {
        let mut res = Self::default();
        for &id in PluginId::ALL {
            match id.activation() {
                Activation::Default => res.activate_default(id, config),
                Activation::Kernel if config.kernel() => res.activate(id),
                Activation::Kernel => {}
            }
        }
        res
    }

    pub fn activate(&mut self, id: PluginId) {
        tracing::debug!(plugin = %id, "activating plugin");
        let plugin = id.construct();
        self.active.entry(plugin.kind()).or_default().push(plugin);
    }

    pub fn activate_named(&mut self, name: &str) -> Result<(), Error> {
        self.activate(name.parse()?);
        Ok(())
    }

    /// Like [`Self::activate`], unless `no-<name>` is set.
    pub fn activate_default(&mut self, id: PluginId, config: &Config) {
        if config.suppressed(id.name()) {
            tracing::debug!(plugin = %id, "plugin suppressed");
            return;
        }
        self.activate(id);
    }

    pub fn of_kind(&self, kind: PluginKind) -> &[Box<dyn Plugin>] {
        self.active.get(&kind).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn is_active(&self, id: PluginId) -> bool {
        self.active
            .get(&id.kind())
            .is_some_and(|list| list.iter().any(|p| p.id() == id))
    }

    /// Offers `call` to every active plugin, kind by kind, until one takes it.
    pub fn rewrite(&self, mut call: Call, overrides: &Settings) -> Result<Node, Call> {
        for kind in PluginKind::ALL {
            for plugin in self.of_kind(kind) {
                match plugin.handle_with(call, overrides) {
                    Ok(node) => {
                        tracing::trace!(plugin = %plugin.id(), "call rewritten");
                        return Ok(node);
                    }
                    Err(back) => call = back,
                }
            }
        }
        Err(call)
    }
}

#[derive(Debug)]
struct BlockGiven;

impl Plugin for BlockGiven {
    fn id(&self) -> PluginId {
        PluginId::BlockGiven
    }

    fn handle(&self, call: Call) -> Result<Node, Call> {
        if call.is_fcall("block_given?", 0) || call.is_fcall("iterator?", 0) {
            Ok(Node::BlockGiven)
        } else {
            Err(call)
        }
    }
}

#[derive(Debug)]
struct Primitive;

impl Plugin for Primitive {
    fn id(&self) -> PluginId {
        PluginId::Primitive
    }

    fn handle(&self, call: Call) -> Result<Node, Call> {
        if !call.is_fcall("primitive", 1) {
            return Err(call);
        }
        if let Node::Sym(name) = &call.args[0] {
            return Ok(Node::Primitive(name.clone()));
        }
        Err(call)
    }
}

/// `(fcall __asm__ (lit :push_nil) (lit 2) ...)` emits the named
/// instructions directly. Integers push themselves.
#[derive(Debug)]
struct Assembly;

impl Assembly {
    fn instruction(arg: &Node) -> Option<Instruction> {
        Some(match arg {
            Node::Int(i) => Instruction::PushInt(*i),
            Node::Sym(name) => match name.as_str() {
                "push_nil" => Instruction::PushNil,
                "push_true" => Instruction::PushTrue,
                "push_false" => Instruction::PushFalse,
                "push_self" => Instruction::PushSelf,
                "push_block_given" => Instruction::PushBlockGiven,
                "push_current_method" => Instruction::PushCurrentMethod,
                "pop" => Instruction::Pop,
                _ => return None,
            },
            _ => return None,
        })
    }
}

impl Plugin for Assembly {
    fn id(&self) -> PluginId {
        PluginId::Assembly
    }

    fn handle(&self, call: Call) -> Result<Node, Call> {
        if call.receiver.is_some() || call.name != "__asm__" || call.args.is_empty() {
            return Err(call);
        }
        match call.args.iter().map(Self::instruction).collect() {
            Some(instructions) => Ok(Node::Assembly(instructions)),
            None => Err(call),
        }
    }
}

#[derive(Debug)]
struct FastMath;

impl FastMath {
    fn op(name: &str) -> Option<MathOp> {
        Some(match name {
            "+" => MathOp::Add,
            "-" => MathOp::Sub,
            "*" => MathOp::Mul,
            "/" => MathOp::Div,
            "==" => MathOp::Eq,
            "<" => MathOp::Lt,
            ">" => MathOp::Gt,
            "<=" => MathOp::Le,
            ">=" => MathOp::Ge,
            _ => return None,
        })
    }
}

impl Plugin for FastMath {
    fn id(&self) -> PluginId {
        PluginId::FastMath
    }

    fn handle(&self, call: Call) -> Result<Node, Call> {
        let Some(op) = Self::op(&call.name) else {
            return Err(call);
        };
        match (call.receiver, <[Node; 1]>::try_from(call.args)) {
            (Some(lhs), Ok([rhs])) => Ok(Node::Math {
                op,
                lhs,
                rhs: Box::new(rhs),
            }),
            (receiver, Ok(args)) => Err(Call {
                receiver,
                args: args.into(),
                ..call
            }),
            (receiver, Err(args)) => Err(Call {
                receiver,
                args,
                ..call
            }),
        }
    }
}

#[derive(Debug)]
struct CurrentMethod;

impl Plugin for CurrentMethod {
    fn id(&self) -> PluginId {
        PluginId::CurrentMethod
    }

    fn handle(&self, call: Call) -> Result<Node, Call> {
        if call.is_fcall("__method__", 0) {
            Ok(Node::CurrentMethod)
        } else {
            Err(call)
        }
    }
}

#[derive(Debug)]
struct FastSystem;

impl Plugin for FastSystem {
    fn id(&self) -> PluginId {
        PluginId::FastSystem
    }

    fn handle(&self, mut call: Call) -> Result<Node, Call> {
        let op = match (call.name.as_str(), call.args.len()) {
            ("class", 0) => SystemOp::Class,
            ("nil?", 0) => SystemOp::IsNil,
            ("object_id", 0) => SystemOp::ObjectId,
            ("kind_of?", 1) => SystemOp::KindOf,
            ("equal?", 1) => SystemOp::Equal,
            _ => return Err(call),
        };
        let Some(receiver) = call.receiver.take() else {
            return Err(call);
        };
        Ok(Node::System {
            op,
            receiver,
            arg: call.args.pop().map(Box::new),
        })
    }
}

/// Sends kernel code through the methods user code can't redefine.
#[derive(Debug)]
struct KernelMethods;

impl KernelMethods {
    fn alias(name: &str) -> Option<&'static str> {
        Some(match name {
            "send" => "__send__",
            "respond_to?" => "__respond_to__",
            "instance_of?" => "__instance_of__",
            _ => return None,
        })
    }
}

impl Plugin for KernelMethods {
    fn id(&self) -> PluginId {
        PluginId::KernelMethods
    }

    fn handle(&self, call: Call) -> Result<Node, Call> {
        match Self::alias(&call.name) {
            Some(alias) => Ok(Node::Send(Call {
                name: alias.to_owned(),
                ..call
            })),
            None => Err(call),
        }
    }
}

#[derive(Debug)]
struct FastGeneric;

impl Plugin for FastGeneric {
    fn id(&self) -> PluginId {
        PluginId::FastGeneric
    }

    fn handle(&self, mut call: Call) -> Result<Node, Call> {
        let op = match (call.name.as_str(), call.args.len()) {
            ("[]", 1) => GenericOp::Index,
            ("[]=", 2) => GenericOp::IndexSet,
            ("<<", 1) => GenericOp::Append,
            _ => return Err(call),
        };
        let Some(receiver) = call.receiver.take() else {
            return Err(call);
        };
        Ok(Node::Generic {
            op,
            receiver,
            args: call.args,
        })
    }
}

/// Makes every send inside a `privately` form private.
#[derive(Debug)]
struct Privately;

impl Plugin for Privately {
    fn id(&self) -> PluginId {
        PluginId::Privately
    }

    fn handle(&self, call: Call) -> Result<Node, Call> {
        Err(call)
    }

    fn handle_with(&self, call: Call, overrides: &Settings) -> Result<Node, Call> {
        let inside = overrides
            .get(settings::PRIVATELY)
            .is_some_and(|s| s.is_truthy());
        if !inside || call.private {
            return Err(call);
        }
        Ok(Node::Send(Call {
            private: true,
            ..call
        }))
    }
}

#[derive(Debug)]
struct ConstExpr;

impl ConstExpr {
    fn fold(name: &str, lhs: i64, rhs: i64) -> Option<i64> {
        match name {
            "+" => lhs.checked_add(rhs),
            "-" => lhs.checked_sub(rhs),
            "*" => lhs.checked_mul(rhs),
            _ => None,
        }
    }
}

impl Plugin for ConstExpr {
    fn id(&self) -> PluginId {
        PluginId::ConstExpr
    }

    fn handle(&self, call: Call) -> Result<Node, Call> {
        let folded = match (call.receiver.as_deref(), call.args.as_slice()) {
            (Some(Node::Int(lhs)), [Node::Int(rhs)]) => Self::fold(&call.name, *lhs, *rhs),
            _ => None,
        };
        match folded {
            Some(value) => Ok(Node::Int(value)),
            None => Err(call),
        }
    }
}

#[derive(Debug)]
struct FastCoerce;

impl Plugin for FastCoerce {
    fn id(&self) -> PluginId {
        PluginId::FastCoerce
    }

    fn handle(&self, call: Call) -> Result<Node, Call> {
        if !call.is_fcall("coerce_to", 2) {
            return Err(call);
        }
        match <[Node; 2]>::try_from(call.args) {
            Ok([value, Node::Sym(target)]) => Ok(Node::Coerce {
                value: Box::new(value),
                target,
            }),
            Ok(args) => Err(Call {
                args: args.into(),
                ..call
            }),
            Err(args) => Err(Call { args, ..call }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::{ConfigStore, FlagValue},
        error::ErrorKind,
    };

    fn send(receiver: Option<Node>, name: &str, args: Vec<Node>) -> Call {
        Call {
            receiver: receiver.map(Box::new),
            name: name.to_owned(),
            args,
            private: false,
        }
    }

    fn rewrite(registry: &PluginRegistry, call: Call) -> Result<Node, Call> {
        registry.rewrite(call, &Settings::new())
    }

    fn kernel_config() -> Config {
        let mut store = ConfigStore::new();
        store.process_flags(&["kernel"]);
        store.freeze()
    }

    #[test]
    fn unknown_plugin_is_a_configuration_error() {
        let mut registry = PluginRegistry::default();
        let err = registry.activate_named("nonexistent-plugin").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert_eq!(err.to_string(), "Unknown plugin 'nonexistent-plugin'");
    }

    #[test]
    fn names_round_trip() {
        for id in PluginId::ALL {
            assert_eq!(id.name().parse::<PluginId>().unwrap(), *id);
        }
    }

    #[test]
    fn suppressed_default_is_skipped() {
        let mut store = ConfigStore::new();
        store.set("no-fastmath", FlagValue::Bool(true));
        let config = store.freeze();

        let mut registry = PluginRegistry::default();
        registry.activate_default(PluginId::FastMath, &config);
        assert!(!registry.is_active(PluginId::FastMath));

        registry.activate_default(PluginId::BlockGiven, &config);
        assert!(registry.is_active(PluginId::BlockGiven));
    }

    #[test]
    fn kernel_plugins_need_kernel_mode() {
        let registry = PluginRegistry::load(&Config::default());
        assert!(registry.is_active(PluginId::FastMath));
        assert!(registry.is_active(PluginId::Assembly));
        assert!(registry.is_active(PluginId::Privately));
        assert!(!registry.is_active(PluginId::ConstExpr));
        assert!(!registry.is_active(PluginId::KernelMethods));
        assert!(!registry.is_active(PluginId::FastCoerce));
        assert!(registry.of_kind(PluginKind::Fold).is_empty());

        let registry = PluginRegistry::load(&kernel_config());
        assert!(registry.is_active(PluginId::ConstExpr));
        assert!(registry.is_active(PluginId::KernelMethods));
        assert!(registry.is_active(PluginId::FastCoerce));
    }

    #[test]
    fn plugins_load_in_order() {
        let registry = PluginRegistry::load(&kernel_config());
        let calls: Vec<_> = registry
            .of_kind(PluginKind::Call)
            .iter()
            .map(|p| p.id().name())
            .collect();
        assert_eq!(
            calls,
            vec![
                "block_given",
                "primitive",
                "assembly",
                "fastmath",
                "current_method",
                "kernel_methods",
                "fastsystem",
                "fastgeneric",
                "privately",
                "fast_coerce",
            ]
        );
    }

    #[test]
    fn fold_runs_before_call_plugins() {
        let registry = PluginRegistry::load(&kernel_config());

        let call = send(Some(Node::Int(2)), "+", vec![Node::Int(3)]);
        assert_eq!(rewrite(&registry, call), Ok(Node::Int(5)));

        let call = send(Some(Node::Int(i64::MAX)), "+", vec![Node::Int(1)]);
        assert!(matches!(
            rewrite(&registry, call),
            Ok(Node::Math {
                op: MathOp::Add,
                ..
            })
        ));
    }

    #[test]
    fn unmatched_calls_come_back_intact() {
        let registry = PluginRegistry::load(&Config::default());
        let call = send(None, "puts", vec![Node::Str("hi".to_owned())]);
        assert_eq!(rewrite(&registry, call.clone()), Err(call));
    }

    #[test]
    fn coerce_requires_symbol_target() {
        let plugin = FastCoerce;
        let call = send(
            None,
            "coerce_to",
            vec![Node::Int(1), Node::Sym("Float".to_owned())],
        );
        assert_eq!(
            plugin.handle(call),
            Ok(Node::Coerce {
                value: Box::new(Node::Int(1)),
                target: "Float".to_owned()
            })
        );

        let call = send(None, "coerce_to", vec![Node::Int(1), Node::Int(2)]);
        assert_eq!(plugin.handle(call.clone()), Err(call));
    }

    #[test]
    fn call_rewrites() {
        let registry = PluginRegistry::load(&Config::default());
        assert_eq!(
            rewrite(&registry, send(None, "block_given?", vec![])),
            Ok(Node::BlockGiven)
        );
        assert_eq!(
            rewrite(&registry, send(None, "primitive", vec![Node::Sym("at".to_owned())])),
            Ok(Node::Primitive("at".to_owned()))
        );
        assert_eq!(
            rewrite(&registry, send(Some(Node::SelfRef), "nil?", vec![])),
            Ok(Node::System {
                op: SystemOp::IsNil,
                receiver: Box::new(Node::SelfRef),
                arg: None
            })
        );
        assert_eq!(
            rewrite(&registry, send(Some(Node::SelfRef), "[]", vec![Node::Int(0)])),
            Ok(Node::Generic {
                op: GenericOp::Index,
                receiver: Box::new(Node::SelfRef),
                args: vec![Node::Int(0)]
            })
        );
    }

    #[test]
    fn asm_emits_named_instructions() {
        let registry = PluginRegistry::load(&Config::default());
        let call = send(
            None,
            "__asm__",
            vec![Node::Sym("push_self".to_owned()), Node::Int(3), Node::Sym("pop".to_owned())],
        );
        assert_eq!(
            rewrite(&registry, call),
            Ok(Node::Assembly(vec![
                Instruction::PushSelf,
                Instruction::PushInt(3),
                Instruction::Pop,
            ]))
        );

        let call = send(None, "__asm__", vec![Node::Sym("jump".to_owned())]);
        assert_eq!(rewrite(&registry, call.clone()), Err(call));
    }

    #[test]
    fn kernel_methods_use_reserved_names() {
        let registry = PluginRegistry::load(&kernel_config());
        let call = send(Some(Node::SelfRef), "respond_to?", vec![Node::Sym("x".to_owned())]);
        assert_eq!(
            rewrite(&registry, call.clone()),
            Ok(Node::Send(Call {
                name: "__respond_to__".to_owned(),
                ..call
            }))
        );

        let registry = PluginRegistry::load(&Config::default());
        let call = send(Some(Node::SelfRef), "send", vec![Node::Sym("x".to_owned())]);
        assert_eq!(rewrite(&registry, call.clone()), Err(call));
    }

    #[test]
    fn privately_follows_the_override() {
        let registry = PluginRegistry::load(&Config::default());
        let call = send(Some(Node::SelfRef), "helper", vec![]);
        assert_eq!(rewrite(&registry, call.clone()), Err(call.clone()));

        let mut overrides = Settings::new();
        overrides.insert(settings::PRIVATELY.to_owned(), true.into());
        assert_eq!(
            registry.rewrite(call.clone(), &overrides),
            Ok(Node::Send(Call {
                private: true,
                ..call.clone()
            }))
        );

        let mut store = ConfigStore::new();
        store.process_flags(&["no-privately"]);
        let registry = PluginRegistry::load(&store.freeze());
        assert_eq!(registry.rewrite(call.clone(), &overrides), Err(call));
    }
}
