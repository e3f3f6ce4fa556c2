//! Instruction listings.
//!
//! A [`Program`] is what the decoder hands over: an ordered list of
//! [`Instruction`]s and a table from label names to instruction indices.
//! It is immutable for the duration of a run.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::error::InterpError;
use crate::types::Reg;

/// The closed set of supported opcodes.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Opcode {
    Mov,
    Add,
    Sub,
    Imul,
    Idiv,
    Cmp,
    Jmp,
    Je,
    Jne,
    Jg,
    Jge,
    Jl,
    Jle,
    Js,
    Jns,
    Call,
    Ret,
    Push,
    Pop,
    Nop,
    Cdq,
    Cdqe,
    Sal,
    Shl,
    Sar,
    Lea,
}

impl Opcode {
    const MNEMONICS: [(&'static str, Opcode); 26] = [
        ("mov", Opcode::Mov),
        ("add", Opcode::Add),
        ("sub", Opcode::Sub),
        ("imul", Opcode::Imul),
        ("idiv", Opcode::Idiv),
        ("cmp", Opcode::Cmp),
        ("jmp", Opcode::Jmp),
        ("je", Opcode::Je),
        ("jne", Opcode::Jne),
        ("jg", Opcode::Jg),
        ("jge", Opcode::Jge),
        ("jl", Opcode::Jl),
        ("jle", Opcode::Jle),
        ("js", Opcode::Js),
        ("jns", Opcode::Jns),
        ("call", Opcode::Call),
        ("ret", Opcode::Ret),
        ("push", Opcode::Push),
        ("pop", Opcode::Pop),
        ("nop", Opcode::Nop),
        ("cdq", Opcode::Cdq),
        ("cdqe", Opcode::Cdqe),
        ("sal", Opcode::Sal),
        ("shl", Opcode::Shl),
        ("sar", Opcode::Sar),
        ("lea", Opcode::Lea),
    ];

    pub fn mnemonic(self) -> &'static str {
        Opcode::MNEMONICS
            .iter()
            .find(|(_, op)| *op == self)
            .map(|(m, _)| *m)
            .unwrap_or("?")
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.mnemonic())
    }
}

impl FromStr for Opcode {
    type Err = InterpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Opcode::MNEMONICS
            .iter()
            .find(|(m, _)| *m == s)
            .map(|(_, op)| *op)
            .ok_or_else(|| InterpError::UnknownOpcode(s.to_string()))
    }
}

/// An operand descriptor.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub enum Operand {
    /// An immediate integer.
    Imm(i64),
    Reg(Reg),
    /// `[base + offset]`
    Mem { base: Reg, offset: i64 },
    /// `[first + scale*second + offset]`
    Array { first: Reg, second: Reg, offset: i64 },
    /// A jump or call target.
    Label(String),
}

impl Operand {
    pub fn mem(base: Reg, offset: i64) -> Self {
        Operand::Mem { base, offset }
    }

    pub fn array(first: Reg, second: Reg, offset: i64) -> Self {
        Operand::Array { first, second, offset }
    }

    pub fn label(name: impl Into<String>) -> Self {
        Operand::Label(name.into())
    }
}

impl From<Reg> for Operand {
    fn from(reg: Reg) -> Self {
        Operand::Reg(reg)
    }
}

impl From<i64> for Operand {
    fn from(n: i64) -> Self {
        Operand::Imm(n)
    }
}

/// Intel-like text form. Array operands always print the default scale of 4;
/// the scale actually applied comes from the explorer configuration.
impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Imm(n) => write!(f, "{}", n),
            Operand::Reg(r) => write!(f, "{}", r),
            Operand::Mem { base, offset } => write!(f, "{}[{}]", offset, base),
            Operand::Array { first, second, offset } => write!(f, "{}[{}+{}*4]", offset, first, second),
            Operand::Label(name) => write!(f, "{}", name),
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Instruction {
    pub opcode: Opcode,
    pub operands: Vec<Operand>,
}

impl Instruction {
    pub fn new(opcode: Opcode, operands: impl IntoIterator<Item = Operand>) -> Self {
        Self {
            opcode,
            operands: operands.into_iter().collect(),
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.opcode)?;
        for (i, op) in self.operands.iter().enumerate() {
            let sep = if i == 0 { " " } else { ", " };
            write!(f, "{}{}", sep, op)?;
        }
        Ok(())
    }
}

/// An instruction listing with its label table.
#[derive(Debug, Clone, Default)]
pub struct Program {
    instructions: Vec<Instruction>,
    labels: HashMap<String, usize>,
}

impl Program {
    pub fn new(instructions: Vec<Instruction>, labels: HashMap<String, usize>) -> Self {
        Self { instructions, labels }
    }

    pub fn builder() -> ProgramBuilder {
        ProgramBuilder::default()
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Instruction> {
        self.instructions.get(index)
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    /// Resolve a label to the index of the instruction it marks.
    pub fn label(&self, name: &str) -> Result<usize, InterpError> {
        self.labels
            .get(name)
            .copied()
            .ok_or_else(|| InterpError::UnknownLabel(name.to_string()))
    }
}

/// Incremental construction of a [`Program`].
///
/// # Examples
///
/// ```
/// use signfork::program::{Opcode, Operand, Program};
/// use signfork::types::Reg;
///
/// let program = Program::builder()
///     .label("main")
///     .ins(Opcode::Mov, [Reg::Eax.into(), Operand::Imm(1)])
///     .ins(Opcode::Ret, [])
///     .build();
///
/// assert_eq!(program.len(), 2);
/// assert_eq!(program.label("main").unwrap(), 0);
/// ```
#[derive(Debug, Default)]
pub struct ProgramBuilder {
    instructions: Vec<Instruction>,
    labels: HashMap<String, usize>,
}

impl ProgramBuilder {
    /// Mark the next instruction with a label.
    pub fn label(mut self, name: impl Into<String>) -> Self {
        self.labels.insert(name.into(), self.instructions.len());
        self
    }

    pub fn ins<const N: usize>(mut self, opcode: Opcode, operands: [Operand; N]) -> Self {
        self.instructions.push(Instruction::new(opcode, operands));
        self
    }

    pub fn build(self) -> Program {
        Program::new(self.instructions, self.labels)
    }
}
