//! Operand resolution.
//!
//! Turns an [`Operand`] into either a value (for reads) or a [`Loc`] (for
//! writes) against the current [`Machine`].
//!
//! Array addresses `first + scale*second + offset` accept abstract indices.
//! An abstract index is replaced by a stand-in displacement (see
//! [`Value::representative`]) and the result is checked against the live stack
//! window `[rsp, rbp)` before any cell is touched. This is a heuristic bound,
//! not real array-bounds reasoning.

use log::trace;

use crate::error::{Fault, InterpError, Trap};
use crate::machine::Machine;
use crate::program::Operand;
use crate::sign::Value;
use crate::types::{Loc, Reg};

impl Machine {
    /// Locate the storage an operand names.
    ///
    /// `at` is the index of the instruction being executed, used for error
    /// reporting only.
    pub fn locate(&self, operand: &Operand, at: usize) -> Result<Loc, Trap> {
        match operand {
            Operand::Reg(Reg::Rip) => Err(unsupported(operand, at)),
            Operand::Reg(reg) => Ok(Loc::Reg(*reg)),
            Operand::Mem { base, offset } => {
                let index = self.base_address(*base, *offset, operand, at)?;
                Ok(Loc::Cell(self.cell_index(index)?))
            }
            Operand::Array { first, second, offset } => {
                let index = self.array_index(*first, *second, *offset)?;
                Ok(Loc::Cell(self.cell_index(index)?))
            }
            Operand::Imm(_) | Operand::Label(_) => Err(unsupported(operand, at)),
        }
    }

    /// Read the value an operand denotes.
    ///
    /// Immediates resolve to [`Value::Concrete`]; the lattice operators classify
    /// them as needed. An empty register or cell resolves to `None`.
    pub fn resolve(&self, operand: &Operand, at: usize) -> Result<Option<Value>, Trap> {
        let value = match operand {
            Operand::Imm(n) => Some(Value::Concrete(*n)),
            Operand::Label(_) => return Err(unsupported(operand, at)),
            _ => {
                let loc = self.locate(operand, at)?;
                self.read(loc)?
            }
        };
        trace!("resolve({}) = {:?}", operand, value);
        Ok(value)
    }

    /// Like [`resolve`][Machine::resolve], but an empty location is a fault.
    pub fn resolve_initialized(&self, operand: &Operand, at: usize) -> Result<Value, Trap> {
        match self.resolve(operand, at)? {
            Some(v) => Ok(v),
            None => Err(Fault::Uninitialized(self.locate(operand, at)?).into()),
        }
    }

    /// Write a value to the storage an operand names.
    pub fn assign(&mut self, operand: &Operand, value: Option<Value>, at: usize) -> Result<Loc, Trap> {
        let loc = self.locate(operand, at)?;
        match loc {
            Loc::Reg(reg) => self.set_reg(reg, value)?,
            Loc::Cell(i) => self.store(i as i64, value)?,
        }
        Ok(loc)
    }

    /// `base + offset` for a base register holding a concrete address.
    pub fn base_address(&self, base: Reg, offset: i64, operand: &Operand, at: usize) -> Result<i64, Trap> {
        if base == Reg::Rip {
            return Err(unsupported(operand, at));
        }
        match self.reg(base)? {
            Some(Value::Concrete(addr)) => addr.checked_add(offset).ok_or_else(|| {
                Fault::OutOfBounds {
                    index: addr.saturating_add(offset),
                }
                .into()
            }),
            _ => Err(InterpError::AbstractBase(base).into()),
        }
    }

    fn array_index(&self, first: Reg, second: Reg, offset: i64) -> Result<i64, Trap> {
        let displacement = |reg: Reg| -> Result<i64, Trap> {
            match self.reg(reg)? {
                Some(v) => Ok(v.representative()),
                None => Err(Fault::Uninitialized(Loc::Reg(reg)).into()),
            }
        };
        let (d1, d2) = (displacement(first)?, displacement(second)?);
        let index = self
            .scale()
            .checked_mul(d2)
            .and_then(|scaled| d1.checked_add(scaled))
            .and_then(|sum| sum.checked_add(offset))
            .ok_or(Fault::OutOfBounds {
                index: d1.saturating_add(self.scale().saturating_mul(d2)).saturating_add(offset),
            })?;
        trace!(
            "array index {}+{}*{}+{} = {} (window [{}, {}))",
            first,
            self.scale(),
            second,
            offset,
            index,
            self.sp(),
            self.bp()
        );
        if index < self.sp() || index >= self.bp() {
            return Err(Fault::OutOfBounds { index }.into());
        }
        Ok(index)
    }

    fn cell_index(&self, index: i64) -> Result<usize, Fault> {
        usize::try_from(index)
            .ok()
            .filter(|&i| i < self.memory_size())
            .ok_or(Fault::OutOfBounds { index })
    }
}

fn unsupported(operand: &Operand, at: usize) -> Trap {
    InterpError::UnsupportedOperand {
        operand: operand.to_string(),
        at,
    }
    .into()
}
