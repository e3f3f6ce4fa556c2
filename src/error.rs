//! Faults and interpreter errors.
//!
//! Two kinds of failure exist and are never mixed:
//!
//! - [`Fault`] is a property of the analysed program on one exploration
//!   branch. It ends that branch, is recorded in the report, and leaves
//!   sibling branches untouched.
//! - [`InterpError`] is a defect in the instruction stream itself (an
//!   unknown opcode, a malformed operand, a label that does not exist). It
//!   aborts the whole run.

use std::fmt;

use thiserror::Error;

use crate::program::Opcode;
use crate::types::{Loc, Reg};

/// A branch-terminal fault.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Fault {
    /// The divisor was classified as zero.
    DivisionByZero,
    /// A memory access fell outside the live stack window or outside memory.
    OutOfBounds { index: i64 },
    /// An explicit call to the user exception target.
    UserRaised,
    /// A conditional jump ran before any compare set the flag.
    FlagUnset,
    /// Arithmetic read a location that was never written.
    Uninitialized(Loc),
}

impl Fault {
    /// Short name of the fault kind, independent of its payload.
    pub fn kind(&self) -> &'static str {
        match self {
            Fault::DivisionByZero => "division-by-zero",
            Fault::OutOfBounds { .. } => "out-of-bounds",
            Fault::UserRaised => "user-raised",
            Fault::FlagUnset => "flag-unset",
            Fault::Uninitialized(_) => "uninitialized",
        }
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fault::DivisionByZero => write!(f, "division by zero"),
            Fault::OutOfBounds { index } => write!(f, "out of bounds access at index {}", index),
            Fault::UserRaised => write!(f, "user-defined exception raised"),
            Fault::FlagUnset => write!(f, "comparison flag read before any compare"),
            Fault::Uninitialized(loc) => write!(f, "read of uninitialized {}", loc),
        }
    }
}

/// A defect in the instruction stream. Fatal to the whole run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InterpError {
    #[error("unknown opcode `{0}`")]
    UnknownOpcode(String),

    #[error("unknown register `{0}`")]
    UnknownRegister(String),

    #[error("unknown label `{0}`")]
    UnknownLabel(String),

    #[error("malformed `{opcode}` at instruction {at}: {reason}")]
    MalformedInstruction {
        opcode: Opcode,
        at: usize,
        reason: &'static str,
    },

    #[error("unsupported operand `{operand}` at instruction {at}")]
    UnsupportedOperand { operand: String, at: usize },

    #[error("base register {0} does not hold a concrete address")]
    AbstractBase(Reg),

    #[error("register {0} cannot hold data")]
    UnsupportedRegister(Reg),

    #[error("attempt to store a non-concrete value in {0}")]
    AbstractStackPointer(Reg),

    #[error("return address in cell {0} read as data")]
    ReturnAddressAsData(usize),

    #[error("`ret` found data instead of a return address in cell {0}")]
    DataAsReturnAddress(usize),

    #[error("instruction index {0} out of range")]
    InstructionOutOfRange(usize),
}

/// Why a single resolution or step could not complete.
///
/// Operand resolution and memory access can hit either kind of failure; the
/// executor splits them back apart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trap {
    Fault(Fault),
    Error(InterpError),
}

impl From<Fault> for Trap {
    fn from(fault: Fault) -> Self {
        Trap::Fault(fault)
    }
}

impl From<InterpError> for Trap {
    fn from(err: InterpError) -> Self {
        Trap::Error(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fault_kinds() {
        assert_eq!(Fault::DivisionByZero.kind(), "division-by-zero");
        assert_eq!(Fault::OutOfBounds { index: -1 }.kind(), "out-of-bounds");
        assert_eq!(Fault::Uninitialized(Loc::Reg(Reg::Eax)).kind(), "uninitialized");
    }

    #[test]
    fn test_display() {
        assert_eq!(Fault::Uninitialized(Loc::Cell(12)).to_string(), "read of uninitialized [12]");
        let err = InterpError::MalformedInstruction {
            opcode: Opcode::Mov,
            at: 3,
            reason: "expected 2 operands",
        };
        assert_eq!(err.to_string(), "malformed `mov` at instruction 3: expected 2 operands");
    }
}
