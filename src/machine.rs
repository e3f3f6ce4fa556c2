//! Abstract machine state.
//!
//! A [`Machine`] is everything one exploration branch owns: the register
//! file, a flat memory, the comparison flag. Branches never share a
//! `Machine`; forking clones it.
//!
//! # Layout
//!
//! - Memory is a fixed array of cells, never resized. An index outside it is
//!   an [`OutOfBounds`][Fault::OutOfBounds] fault.
//! - The stack grows down from `stack_base`. `rsp` and `rbp` are kept outside
//!   the general file as plain integers, so they can never become abstract.
//! - Cells above the initial stack pointer model arguments passed on the stack
//!   and start out as `⊤`.

use std::fmt;

use crate::error::{Fault, InterpError, Trap};
use crate::explore::ExploreConfig;
use crate::sign::Value;
use crate::types::{Loc, Reg};

/// Contents of a memory cell.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Slot {
    Value(Value),
    /// Index of a `call` instruction to resume after.
    Return(usize),
}

#[derive(Clone)]
pub struct Machine {
    sp: i64,
    bp: i64,
    regs: [Option<Value>; Reg::COUNT],
    memory: Vec<Option<Slot>>,
    flag: Option<Value>,
    word_size: i64,
    scale: i64,
}

impl Machine {
    pub fn new(config: &ExploreConfig) -> Self {
        let mut regs = [None; Reg::COUNT];
        for reg in Reg::ARGUMENTS {
            if let Some(slot) = reg.slot() {
                regs[slot] = Some(Value::Top);
            }
        }

        let mut memory = vec![None; config.memory_size];
        let base = config.stack_base;
        for i in Reg::ARGUMENTS.len()..Reg::ARGUMENTS.len() + config.stack_arguments {
            let index = (i as i64 + 1)
                .checked_mul(config.word_size)
                .and_then(|off| base.checked_add(off));
            match index
                .and_then(|index| usize::try_from(index).ok())
                .and_then(|i| memory.get_mut(i))
            {
                Some(cell) => *cell = Some(Slot::Value(Value::Top)),
                None => break,
            }
        }

        Self {
            sp: base,
            bp: base,
            regs,
            memory,
            flag: None,
            word_size: config.word_size,
            scale: config.array_scale,
        }
    }

    pub fn sp(&self) -> i64 {
        self.sp
    }

    pub fn bp(&self) -> i64 {
        self.bp
    }

    /// Multiplier applied to the second index of an array address.
    pub fn scale(&self) -> i64 {
        self.scale
    }

    pub fn memory_size(&self) -> usize {
        self.memory.len()
    }

    /// Read a register. The stack pair reads as concrete integers.
    pub fn reg(&self, reg: Reg) -> Result<Option<Value>, InterpError> {
        match reg {
            Reg::Rsp => Ok(Some(Value::Concrete(self.sp))),
            Reg::Rbp => Ok(Some(Value::Concrete(self.bp))),
            _ => reg
                .slot()
                .map(|slot| self.regs[slot])
                .ok_or(InterpError::UnsupportedRegister(reg)),
        }
    }

    /// Write a register.
    ///
    /// The stack pair only accepts concrete integers.
    pub fn set_reg(&mut self, reg: Reg, value: Option<Value>) -> Result<(), InterpError> {
        match (reg, value) {
            (Reg::Rsp, Some(Value::Concrete(n))) => self.sp = n,
            (Reg::Rbp, Some(Value::Concrete(n))) => self.bp = n,
            (Reg::Rsp | Reg::Rbp, _) => return Err(InterpError::AbstractStackPointer(reg)),
            _ => {
                let slot = reg.slot().ok_or(InterpError::UnsupportedRegister(reg))?;
                self.regs[slot] = value;
            }
        }
        Ok(())
    }

    fn index(&self, index: i64) -> Result<usize, Fault> {
        usize::try_from(index)
            .ok()
            .filter(|&i| i < self.memory.len())
            .ok_or(Fault::OutOfBounds { index })
    }

    /// Read a memory cell as data.
    pub fn load(&self, index: i64) -> Result<Option<Value>, Trap> {
        let i = self.index(index)?;
        match self.memory[i] {
            None => Ok(None),
            Some(Slot::Value(v)) => Ok(Some(v)),
            Some(Slot::Return(_)) => Err(InterpError::ReturnAddressAsData(i).into()),
        }
    }

    /// Write data to a memory cell.
    pub fn store(&mut self, index: i64, value: Option<Value>) -> Result<(), Fault> {
        let i = self.index(index)?;
        self.memory[i] = value.map(Slot::Value);
        Ok(())
    }

    /// Push a cell onto the stack. Pushing an empty register pushes `None`.
    pub fn push(&mut self, slot: Option<Slot>) -> Result<(), Fault> {
        let top = self
            .sp
            .checked_sub(self.word_size)
            .ok_or(Fault::OutOfBounds { index: i64::MIN })?;
        let i = self.index(top)?;
        self.sp = top;
        self.memory[i] = slot;
        Ok(())
    }

    /// Pop the cell at the stack pointer. An empty cell pops as `None`.
    pub fn pop(&mut self) -> Result<Option<Slot>, Fault> {
        let i = self.index(self.sp)?;
        self.sp += self.word_size;
        Ok(self.memory[i])
    }

    pub fn flag(&self) -> Option<Value> {
        self.flag
    }

    pub fn set_flag(&mut self, value: Value) {
        self.flag = Some(value);
    }

    /// Read a location written by a previous step.
    pub fn read(&self, loc: Loc) -> Result<Option<Value>, Trap> {
        match loc {
            Loc::Reg(reg) => Ok(self.reg(reg)?),
            Loc::Cell(i) => self.load(i as i64),
        }
    }

    /// Overwrite a location with a value.
    pub fn write(&mut self, loc: Loc, value: Value) -> Result<(), Trap> {
        match loc {
            Loc::Reg(reg) => self.set_reg(reg, Some(value))?,
            Loc::Cell(i) => self.store(i as i64, Some(value))?,
        }
        Ok(())
    }
}

impl fmt::Debug for Machine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let regs: Vec<String> = Reg::GENERAL
            .iter()
            .zip(self.regs.iter())
            .filter_map(|(r, v)| v.map(|v| format!("{}={}", r, v)))
            .collect();
        f.debug_struct("Machine")
            .field("sp", &self.sp)
            .field("bp", &self.bp)
            .field("regs", &regs)
            .field("flag", &self.flag)
            .field("occupied", &self.memory.iter().filter(|c| c.is_some()).count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine() -> Machine {
        Machine::new(&ExploreConfig::default())
    }

    #[test]
    fn test_initial_state() {
        let m = machine();
        assert_eq!(m.sp(), 9000);
        assert_eq!(m.bp(), 9000);
        assert_eq!(m.memory_size(), 10_000);
        assert_eq!(m.reg(Reg::Ecx).unwrap(), Some(Value::Top));
        assert_eq!(m.reg(Reg::R9d).unwrap(), Some(Value::Top));
        assert_eq!(m.reg(Reg::Eax).unwrap(), None);
        assert_eq!(m.flag(), None);
    }

    #[test]
    fn test_argument_window() {
        let m = machine();
        // Fifth argument onwards.
        assert_eq!(m.load(9000 + 8 * 5).unwrap(), Some(Value::Top));
        assert_eq!(m.load(9000 + 8 * 84).unwrap(), Some(Value::Top));
        assert_eq!(m.load(9000 + 8 * 85).unwrap(), None);
        assert_eq!(m.load(9000 + 8 * 4).unwrap(), None);
        assert_eq!(m.load(9000).unwrap(), None);
    }

    #[test]
    fn test_stack_pair_stays_concrete() {
        let mut m = machine();
        m.set_reg(Reg::Rbp, Some(Value::Concrete(8000))).unwrap();
        assert_eq!(m.bp(), 8000);
        assert_eq!(
            m.set_reg(Reg::Rsp, Some(Value::Positive)),
            Err(InterpError::AbstractStackPointer(Reg::Rsp))
        );
        assert_eq!(m.sp(), 9000);
        assert_eq!(m.reg(Reg::Rip), Err(InterpError::UnsupportedRegister(Reg::Rip)));
    }

    #[test]
    fn test_push_pop() {
        let mut m = machine();
        m.push(Some(Slot::Return(17))).unwrap();
        m.push(Some(Slot::Value(Value::Negative))).unwrap();
        assert_eq!(m.sp(), 9000 - 16);
        assert_eq!(m.pop().unwrap(), Some(Slot::Value(Value::Negative)));
        assert_eq!(m.pop().unwrap(), Some(Slot::Return(17)));
        assert_eq!(m.sp(), 9000);
        assert_eq!(m.pop().unwrap(), None);
    }

    #[test]
    fn test_push_at_the_bottom_of_i64() {
        let mut m = machine();
        m.set_reg(Reg::Rsp, Some(Value::Concrete(i64::MIN + 3))).unwrap();
        assert_eq!(m.push(None), Err(Fault::OutOfBounds { index: i64::MIN }));
        assert_eq!(m.sp(), i64::MIN + 3);
    }

    #[test]
    fn test_memory_bounds() {
        let mut m = machine();
        assert_eq!(m.store(-1, Some(Value::Zero)), Err(Fault::OutOfBounds { index: -1 }));
        assert_eq!(m.load(10_000), Err(Trap::Fault(Fault::OutOfBounds { index: 10_000 })));
    }

    #[test]
    fn test_return_address_is_not_data() {
        let mut m = machine();
        m.push(Some(Slot::Return(3))).unwrap();
        assert_eq!(m.load(m.sp()), Err(Trap::Error(InterpError::ReturnAddressAsData(8992))));
    }

    #[test]
    fn test_clone_is_independent() {
        let mut a = machine();
        let b = a.clone();
        a.set_reg(Reg::Eax, Some(Value::Positive)).unwrap();
        a.store(100, Some(Value::Zero)).unwrap();
        assert_eq!(b.reg(Reg::Eax).unwrap(), None);
        assert_eq!(b.load(100).unwrap(), None);
    }
}
