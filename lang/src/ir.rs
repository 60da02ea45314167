//! Converted nodes: what handlers produce, and how a root node becomes a
//! [`Method`].

use crate::{
    error::{Error, GenerationError},
    generator::{
        show_errors, GenericOp, Generator, Instruction, Literal, MathOp, Method, SystemOp,
    },
};

/// Where a local variable lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Local {
    /// A slot of the method being compiled.
    Slot(usize),
    /// A variable of an enclosing scope, `depth` scopes out.
    Captured { depth: usize, index: usize },
    /// A variable that only exists in the eval context.
    Dynamic(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub receiver: Option<Box<Node>>,
    pub name: String,
    pub args: Vec<Node>,
    pub private: bool,
}

impl Call {
    pub fn is_fcall(&self, name: &str, argc: usize) -> bool {
        self.receiver.is_none() && self.name == name && self.args.len() == argc
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    pub line: Option<usize>,
    pub node: Node,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Script {
        body: Vec<Statement>,
        local_count: usize,
    },
    EvalExpression {
        body: Vec<Statement>,
    },
    Sequence(Vec<Statement>),

    Nil,
    True,
    False,
    SelfRef,
    Int(i64),
    Str(String),
    Sym(String),

    Local(Local),
    Assign(Local, Box<Node>),

    Send(Call),
    Math {
        op: MathOp,
        lhs: Box<Node>,
        rhs: Box<Node>,
    },
    System {
        op: SystemOp,
        receiver: Box<Node>,
        arg: Option<Box<Node>>,
    },
    Generic {
        op: GenericOp,
        receiver: Box<Node>,
        args: Vec<Node>,
    },
    BlockGiven,
    CurrentMethod,
    Primitive(String),
    /// Instructions emitted as written.
    Assembly(Vec<Instruction>),
    Coerce {
        value: Box<Node>,
        target: String,
    },
}

impl Node {
    pub fn to_description(self, name: impl Into<String>) -> Description {
        let (body, local_count) = match self {
            Node::Script { body, local_count } => (body, local_count),
            Node::EvalExpression { body } => (body, 0),
            Node::Sequence(body) => (body, 0),
            other => (
                vec![Statement {
                    line: None,
                    node: other,
                }],
                0,
            ),
        };
        Description {
            name: name.into(),
            file: None,
            for_block: false,
            local_count,
            body,
        }
    }

    fn emit(&self, g: &mut dyn Generator) -> anyhow::Result<()> {
        match self {
            Node::Script { body, .. } | Node::EvalExpression { body } | Node::Sequence(body) => {
                emit_body(g, body)
            }
            Node::Nil => g.emit(Instruction::PushNil),
            Node::True => g.emit(Instruction::PushTrue),
            Node::False => g.emit(Instruction::PushFalse),
            Node::SelfRef => g.emit(Instruction::PushSelf),
            Node::Int(i) => g.emit(Instruction::PushInt(*i)),
            Node::Str(s) => {
                let idx = g.literal(Literal::Str(s.clone()));
                g.emit(Instruction::PushLiteral(idx))
            }
            Node::Sym(s) => {
                let idx = g.literal(Literal::Sym(s.clone()));
                g.emit(Instruction::PushLiteral(idx))
            }
            Node::Local(local) => match local {
                Local::Slot(slot) => g.emit(Instruction::PushLocal(*slot)),
                Local::Captured { depth, index } => g.emit(Instruction::PushLocalDepth {
                    depth: *depth,
                    index: *index,
                }),
                Local::Dynamic(name) => {
                    let idx = g.literal(Literal::Sym(name.clone()));
                    g.emit(Instruction::PushDynamic(idx))
                }
            },
            Node::Assign(local, value) => {
                value.emit(g)?;
                match local {
                    Local::Slot(slot) => g.emit(Instruction::SetLocal(*slot)),
                    Local::Captured { depth, index } => g.emit(Instruction::SetLocalDepth {
                        depth: *depth,
                        index: *index,
                    }),
                    Local::Dynamic(name) => {
                        let idx = g.literal(Literal::Sym(name.clone()));
                        g.emit(Instruction::SetDynamic(idx))
                    }
                }
            }
            Node::Send(call) => {
                match &call.receiver {
                    Some(recv) => recv.emit(g)?,
                    None => g.emit(Instruction::PushSelf)?,
                }
                for arg in call.args.iter() {
                    arg.emit(g)?;
                }
                g.send(&call.name, call.args.len(), call.private)
            }
            Node::Math { op, lhs, rhs } => {
                lhs.emit(g)?;
                rhs.emit(g)?;
                g.emit(Instruction::Math(*op))
            }
            Node::System { op, receiver, arg } => {
                receiver.emit(g)?;
                if let Some(arg) = arg {
                    arg.emit(g)?;
                }
                g.emit(Instruction::System(*op))
            }
            Node::Generic { op, receiver, args } => {
                receiver.emit(g)?;
                for arg in args {
                    arg.emit(g)?;
                }
                g.emit(Instruction::Generic(*op))
            }
            Node::BlockGiven => g.emit(Instruction::PushBlockGiven),
            Node::CurrentMethod => g.emit(Instruction::PushCurrentMethod),
            Node::Primitive(name) => Err(GenerationError::new(format!(
                "primitive :{name} must be the first statement of a method"
            ))
            .at(g.file(), g.line())
            .into()),
            Node::Assembly(instructions) => {
                for insn in instructions {
                    g.emit(*insn)?;
                }
                Ok(())
            }
            Node::Coerce { value, target } => {
                value.emit(g)?;
                let idx = g.literal(Literal::Sym(target.clone()));
                g.emit(Instruction::Coerce(idx))
            }
        }
    }
}

/// Emits statements, leaving only the last one's value on the stack.
fn emit_body(g: &mut dyn Generator, body: &[Statement]) -> anyhow::Result<()> {
    if body.is_empty() {
        return g.emit(Instruction::PushNil);
    }
    for (i, stmt) in body.iter().enumerate() {
        g.set_position(None, stmt.line);
        stmt.node.emit(g)?;
        if i + 1 < body.len() {
            g.emit(Instruction::Pop)?;
        }
    }
    Ok(())
}

/// A backend-agnostic method body, ready to be assembled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Description {
    pub name: String,
    pub file: Option<String>,
    pub for_block: bool,
    pub local_count: usize,
    pub body: Vec<Statement>,
}

impl Description {
    pub fn to_executable(mut self, mut gen: Box<dyn Generator>) -> Result<Method, Error> {
        let primitive = match self.body.first() {
            Some(Statement {
                node: Node::Primitive(name),
                ..
            }) => {
                let name = name.clone();
                self.body.remove(0);
                Some(name)
            }
            _ => None,
        };

        gen.set_position(self.file.as_deref(), None);
        show_errors(gen.as_mut(), |g| {
            emit_body(g, &self.body)?;
            g.emit(Instruction::Ret)
        })?;
        let code = gen.finish();

        tracing::debug!(
            name = %self.name,
            instructions = code.instructions.len(),
            "assembled method"
        );

        Ok(Method {
            name: self.name,
            file: self.file,
            for_block: self.for_block,
            primitive,
            local_count: self.local_count,
            literals: code.literals,
            instructions: code.instructions,
        })
    }
}
