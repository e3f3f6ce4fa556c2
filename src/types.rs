//! Register names and storage locations.
//!
//! This module provides small typed wrappers that keep register slots and
//! memory cells apart, so that a fork can name exactly which location it
//! overwrites.
use std::fmt;
use std::str::FromStr;

use crate::error::InterpError;

/// A machine register.
///
/// The 32-bit and 64-bit x86 names of a register share one slot: `eax` and
/// `rax` both parse to [`Reg::Eax`].
///
/// # Invariants
///
/// - [`Reg::Rsp`] and [`Reg::Rbp`] always hold a concrete integer.
/// - [`Reg::Rip`] is only an addressing root; it is never stored.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum Reg {
    Eax,
    Ebx,
    Ecx,
    Edx,
    Esi,
    Edi,
    R8d,
    R9d,
    Rsp,
    Rbp,
    Rip,
}

impl Reg {
    /// Size of the general register file.
    pub const COUNT: usize = 8;

    /// Registers that live in the general file (everything except the stack
    /// pair and `rip`).
    pub const GENERAL: [Reg; Reg::COUNT] = [
        Reg::Eax,
        Reg::Ebx,
        Reg::Ecx,
        Reg::Edx,
        Reg::Esi,
        Reg::Edi,
        Reg::R8d,
        Reg::R9d,
    ];

    /// Registers carrying the first four incoming arguments.
    pub const ARGUMENTS: [Reg; 4] = [Reg::Ecx, Reg::Edx, Reg::R8d, Reg::R9d];

    /// Returns `true` for the stack pointer and the base pointer.
    pub fn is_stack(self) -> bool {
        matches!(self, Reg::Rsp | Reg::Rbp)
    }

    /// Position of the register in the general file, if it has one.
    pub fn slot(self) -> Option<usize> {
        Reg::GENERAL.iter().position(|&r| r == self)
    }

    pub fn name(self) -> &'static str {
        match self {
            Reg::Eax => "eax",
            Reg::Ebx => "ebx",
            Reg::Ecx => "ecx",
            Reg::Edx => "edx",
            Reg::Esi => "esi",
            Reg::Edi => "edi",
            Reg::R8d => "r8d",
            Reg::R9d => "r9d",
            Reg::Rsp => "rsp",
            Reg::Rbp => "rbp",
            Reg::Rip => "rip",
        }
    }
}

impl fmt::Display for Reg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for Reg {
    type Err = InterpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let reg = match s {
            "eax" | "rax" => Reg::Eax,
            "ebx" | "rbx" => Reg::Ebx,
            "ecx" | "rcx" => Reg::Ecx,
            "edx" | "rdx" => Reg::Edx,
            "esi" | "rsi" => Reg::Esi,
            "edi" | "rdi" => Reg::Edi,
            "r8d" | "r8" => Reg::R8d,
            "r9d" | "r9" => Reg::R9d,
            "esp" | "rsp" => Reg::Rsp,
            "ebp" | "rbp" => Reg::Rbp,
            "rip" => Reg::Rip,
            _ => return Err(InterpError::UnknownRegister(s.to_string())),
        };
        Ok(reg)
    }
}

/// A storage location that an instruction can write.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Loc {
    Reg(Reg),
    /// A memory cell, by absolute index.
    Cell(usize),
}

impl fmt::Display for Loc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Loc::Reg(r) => write!(f, "{}", r),
            Loc::Cell(i) => write!(f, "[{}]", i),
        }
    }
}

impl From<Reg> for Loc {
    fn from(reg: Reg) -> Self {
        Loc::Reg(reg)
    }
}
