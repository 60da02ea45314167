//! Instruction emission.
//!
//! The compiler only ever talks to a [`Generator`] through this trait; the
//! [`Assembler`] here is the reference backend that produces [`Method`]s.

use derive_more::derive::{From, Into};
use serde::{Deserialize, Serialize};
use typed_index_collections::TiVec;

use crate::error::{GenerationError, Location};

/// Upper bound on arguments to a single send.
pub const MAX_ARGS: usize = 255;

#[derive(From, Into, Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LiteralIndex(usize);

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Literal {
    Int(i64),
    Str(String),
    Sym(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MathOp {
    Add,
    Sub,
    Mul,
    Div,
    Eq,
    Lt,
    Gt,
    Le,
    Ge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SystemOp {
    Class,
    IsNil,
    ObjectId,
    KindOf,
    Equal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GenericOp {
    Index,
    IndexSet,
    Append,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Instruction {
    PushNil,
    PushTrue,
    PushFalse,
    PushSelf,
    PushInt(i64),
    PushLiteral(LiteralIndex),
    PushLocal(usize),
    SetLocal(usize),
    PushLocalDepth { depth: usize, index: usize },
    SetLocalDepth { depth: usize, index: usize },
    /// Reads a local that only exists in the eval context, by name.
    PushDynamic(LiteralIndex),
    SetDynamic(LiteralIndex),
    Send {
        name: LiteralIndex,
        argc: u8,
        private: bool,
    },
    Math(MathOp),
    System(SystemOp),
    Generic(GenericOp),
    PushBlockGiven,
    PushCurrentMethod,
    Coerce(LiteralIndex),
    Pop,
    Ret,
}

#[derive(Debug, thiserror::Error)]
pub enum AssemblerError {
    #[error("too many arguments to {name}: {argc} (max 255)")]
    TooManyArguments { name: String, argc: usize },
}

/// Everything a generator produced for one method body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Code {
    pub literals: TiVec<LiteralIndex, Literal>,
    pub instructions: Vec<Instruction>,
}

pub trait Generator {
    fn file(&self) -> Option<&str>;
    fn line(&self) -> Option<usize>;
    fn set_position(&mut self, file: Option<&str>, line: Option<usize>);

    fn literal(&mut self, literal: Literal) -> LiteralIndex;
    fn emit(&mut self, instruction: Instruction) -> anyhow::Result<()>;

    fn send(&mut self, name: &str, argc: usize, private: bool) -> anyhow::Result<()>;

    /// Hands over everything emitted so far and resets the generator.
    fn finish(&mut self) -> Code;
}

pub type GeneratorFactory = fn() -> Box<dyn Generator>;

#[derive(Debug, Default)]
pub struct Assembler {
    file: Option<String>,
    line: Option<usize>,
    code: Code,
}

impl Assembler {
    pub fn boxed() -> Box<dyn Generator> {
        Box::new(Self::default())
    }
}

impl Generator for Assembler {
    fn file(&self) -> Option<&str> {
        self.file.as_deref()
    }

    fn line(&self) -> Option<usize> {
        self.line
    }

    fn set_position(&mut self, file: Option<&str>, line: Option<usize>) {
        if let Some(file) = file {
            self.file = Some(file.to_owned());
        }
        if line.is_some() {
            self.line = line;
        }
    }

    fn literal(&mut self, literal: Literal) -> LiteralIndex {
        if let Some((idx, _)) = self
            .code
            .literals
            .iter_enumerated()
            .find(|(_, l)| **l == literal)
        {
            return idx;
        }
        self.code.literals.push_and_get_key(literal)
    }

    fn emit(&mut self, instruction: Instruction) -> anyhow::Result<()> {
        tracing::trace!(?instruction, "emit");
        self.code.instructions.push(instruction);
        Ok(())
    }

    fn send(&mut self, name: &str, argc: usize, private: bool) -> anyhow::Result<()> {
        let Ok(small) = u8::try_from(argc) else {
            return Err(AssemblerError::TooManyArguments {
                name: name.to_owned(),
                argc,
            }
            .into());
        };
        let name = self.literal(Literal::Sym(name.to_owned()));
        self.emit(Instruction::Send {
            name,
            argc: small,
            private,
        })
    }

    fn finish(&mut self) -> Code {
        std::mem::take(&mut self.code)
    }
}

/// Runs backend work. A [`GenerationError`] coming out of `work` is passed
/// through as is; anything else is reported with the generator's position
/// and collapsed into a generic "unable to generate bytecode" error.
pub fn show_errors<T>(
    gen: &mut dyn Generator,
    work: impl FnOnce(&mut dyn Generator) -> anyhow::Result<T>,
) -> Result<T, GenerationError> {
    match work(&mut *gen) {
        Ok(res) => Ok(res),
        Err(e) => match e.downcast::<GenerationError>() {
            Ok(classified) => Err(classified),
            Err(e) => {
                let location = Location {
                    file: gen.file(),
                    line: gen.line(),
                };
                tracing::error!(
                    error = %e,
                    kind = ?e,
                    "Bytecode generation error near {location}"
                );
                Err(GenerationError::new("unable to generate bytecode")
                    .at(gen.file(), gen.line()))
            }
        },
    }
}

/// A finished, executable method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Method {
    pub name: String,
    pub file: Option<String>,
    /// Callable as a nested block rather than as a method.
    pub for_block: bool,
    pub primitive: Option<String>,
    pub local_count: usize,
    pub literals: TiVec<LiteralIndex, Literal>,
    pub instructions: Vec<Instruction>,
}

#[derive(Serialize, Deserialize)]
struct MethodSerde {
    name: String,
    file: Option<String>,
    for_block: bool,
    primitive: Option<String>,
    local_count: usize,
    literals: Vec<Literal>,
    instructions: Vec<Instruction>,
}

impl Serialize for Method {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let serde_repr = MethodSerde {
            name: self.name.clone(),
            file: self.file.clone(),
            for_block: self.for_block,
            primitive: self.primitive.clone(),
            local_count: self.local_count,
            literals: self.literals.iter().cloned().collect(),
            instructions: self.instructions.clone(),
        };
        serde_repr.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Method {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let serde_repr = MethodSerde::deserialize(deserializer)?;
        Ok(Method {
            name: serde_repr.name,
            file: serde_repr.file,
            for_block: serde_repr.for_block,
            primitive: serde_repr.primitive,
            local_count: serde_repr.local_count,
            literals: serde_repr.literals.into_iter().collect(),
            instructions: serde_repr.instructions,
        })
    }
}

impl Method {
    pub fn find_literal(&self, literal: &Literal) -> Option<LiteralIndex> {
        self.literals
            .iter_enumerated()
            .find_map(|(i, l)| if l == literal { Some(i) } else { None })
    }

    /// Human readable listing, one instruction per line.
    pub fn listing(&self) -> String {
        let mut out = format!("== {} ==\n", self.name);
        if let Some(prim) = &self.primitive {
            out.push_str(&format!("primitive: {prim}\n"));
        }
        for (i, insn) in self.instructions.iter().enumerate() {
            out.push_str(&format!("{i:04} {}\n", self.describe(insn)));
        }
        out
    }

    fn describe(&self, insn: &Instruction) -> String {
        let lit = |idx: &LiteralIndex| match &self.literals[*idx] {
            Literal::Int(i) => i.to_string(),
            Literal::Str(s) => format!("{s:?}"),
            Literal::Sym(s) => format!(":{s}"),
        };
        match insn {
            Instruction::PushLiteral(idx) => format!("push_literal {}", lit(idx)),
            Instruction::PushDynamic(idx) => format!("push_dynamic {}", lit(idx)),
            Instruction::SetDynamic(idx) => format!("set_dynamic {}", lit(idx)),
            Instruction::Coerce(idx) => format!("coerce {}", lit(idx)),
            Instruction::Send {
                name,
                argc,
                private,
            } => {
                let kind = if *private { "send_private" } else { "send" };
                format!("{kind} {} {argc}", lit(name))
            }
            other => format!("{other:?}"),
        }
    }
}
