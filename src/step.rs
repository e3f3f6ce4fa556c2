//! Single-instruction execution.
//!
//! [`Executor::step`] runs one instruction against a [`Machine`] and tells the
//! driver what to do next. It never recurses and never looks past the current
//! instruction: jumps, calls and returns come back as [`Step::Jump`], and a
//! `⊤` written to a destination or to the flag comes back as [`Step::Fork`].

use log::debug;

use crate::error::{Fault, InterpError, Trap};
use crate::explore::ExploreConfig;
use crate::machine::{Machine, Slot};
use crate::program::{Instruction, Opcode, Operand, Program};
use crate::sign::Value;
use crate::types::{Loc, Reg};

/// A place a fork overwrites with each concrete sign case.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Site {
    Loc(Loc),
    Flag,
}

/// What the driver should do after one instruction.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Step {
    /// Continue with the following instruction.
    Next,
    /// Continue at the given instruction index.
    Jump(usize),
    /// The instruction left `⊤` at these sites; split into sign cases.
    Fork(Vec<Site>),
    /// Outermost return: the branch completed normally.
    Return,
    /// The branch reached code outside the model (a `rip`-relative address).
    Unmodeled,
    Fault(Fault),
}

pub struct Executor<'a> {
    program: &'a Program,
    config: &'a ExploreConfig,
}

impl<'a> Executor<'a> {
    pub fn new(program: &'a Program, config: &'a ExploreConfig) -> Self {
        Self { program, config }
    }

    /// Execute the instruction at `at`.
    ///
    /// Faults of the analysed program are returned as [`Step::Fault`]. An
    /// [`InterpError`] means the listing itself is broken.
    pub fn step(&self, machine: &mut Machine, at: usize) -> Result<Step, InterpError> {
        let ins = self.program.get(at).ok_or(InterpError::InstructionOutOfRange(at))?;
        debug!("[{}] {}", at, ins);
        match self.exec(machine, ins, at) {
            Ok(step) => Ok(step),
            Err(Trap::Fault(fault)) => Ok(Step::Fault(fault)),
            Err(Trap::Error(err)) => Err(err),
        }
    }

    fn exec(&self, m: &mut Machine, ins: &Instruction, at: usize) -> Result<Step, Trap> {
        let ops = &ins.operands;
        match ins.opcode {
            Opcode::Mov => {
                let [dst, src] = operands::<2>(ins, at)?;
                let value = m.resolve(src, at)?.map(Value::mov);
                // Literals are widened to a sign unless they land in the stack pair.
                let value = match (src, dst) {
                    (Operand::Imm(_), Operand::Reg(r)) if r.is_stack() => value,
                    (Operand::Imm(_), _) => value.map(Value::widen),
                    _ => value,
                };
                let loc = m.assign(dst, value, at)?;
                Ok(split_on_top(value, [loc]))
            }

            Opcode::Add | Opcode::Sub => {
                let [dst, src] = operands::<2>(ins, at)?;
                if let (Operand::Reg(reg), Operand::Imm(n)) = (dst, src) {
                    if reg.is_stack() {
                        let current = if *reg == Reg::Rsp { m.sp() } else { m.bp() };
                        let (moved, saturated) = if ins.opcode == Opcode::Add {
                            (current.checked_add(*n), current.saturating_add(*n))
                        } else {
                            (current.checked_sub(*n), current.saturating_sub(*n))
                        };
                        let moved = moved.ok_or(Fault::OutOfBounds { index: saturated })?;
                        m.set_reg(*reg, Some(Value::Concrete(moved)))?;
                        return Ok(Step::Next);
                    }
                }
                let a = m.resolve_initialized(dst, at)?;
                let b = m.resolve_initialized(src, at)?;
                let r = if ins.opcode == Opcode::Add { a + b } else { a - b };
                let loc = m.assign(dst, Some(r), at)?;
                Ok(split_on_top(Some(r), [loc]))
            }

            Opcode::Imul => {
                let (dst, a, b) = match ops.as_slice() {
                    [dst, src] => (dst, dst, src),
                    [dst, a, b] => (dst, a, b),
                    _ => return Err(malformed(ins, at, "expected 2 or 3 operands")),
                };
                let r = m.resolve_initialized(a, at)? * m.resolve_initialized(b, at)?;
                let loc = m.assign(dst, Some(r), at)?;
                Ok(split_on_top(Some(r), [loc]))
            }

            Opcode::Idiv => {
                let eax = Operand::Reg(Reg::Eax);
                let (dividend, divisor) = match ops.as_slice() {
                    [src] => (&eax, src),
                    [dst, src] => (dst, src),
                    _ => return Err(malformed(ins, at, "expected 1 or 2 operands")),
                };
                let divisor = m.resolve_initialized(divisor, at)?;
                if divisor.widen() == Value::Zero {
                    return Err(Fault::DivisionByZero.into());
                }
                let q = m.resolve_initialized(dividend, at)?.divide(divisor)?;
                let loc = m.assign(dividend, Some(q), at)?;
                if ops.len() == 1 {
                    // edx mirrors the quotient's sign.
                    let edx = m.assign(&Operand::Reg(Reg::Edx), Some(q), at)?;
                    return Ok(split_on_top(Some(q), [loc, edx]));
                }
                Ok(split_on_top(Some(q), [loc]))
            }

            Opcode::Cmp => {
                let [a, b] = operands::<2>(ins, at)?;
                let flag = m.resolve_initialized(a, at)?.compare(m.resolve_initialized(b, at)?);
                m.set_flag(flag);
                if flag.is_top() {
                    return Ok(Step::Fork(vec![Site::Flag]));
                }
                Ok(Step::Next)
            }

            Opcode::Jmp => Ok(Step::Jump(self.target(ins, at)?)),

            op @ (Opcode::Je
            | Opcode::Jne
            | Opcode::Jg
            | Opcode::Jge
            | Opcode::Jl
            | Opcode::Jle
            | Opcode::Js
            | Opcode::Jns) => {
                let target = self.target(ins, at)?;
                let flag = m.flag().ok_or(Fault::FlagUnset)?;
                if taken(op, flag) {
                    Ok(Step::Jump(target))
                } else {
                    Ok(Step::Next)
                }
            }

            Opcode::Call => {
                let [callee] = operands::<1>(ins, at)?;
                if let Operand::Label(name) = callee {
                    if *name == self.config.exception_target {
                        return Err(Fault::UserRaised.into());
                    }
                }
                let target = self.target(ins, at)?;
                m.push(Some(Slot::Return(at)))?;
                Ok(Step::Jump(target))
            }

            Opcode::Ret => {
                let cell = m.sp();
                match m.pop()? {
                    None => Ok(Step::Return),
                    Some(Slot::Return(call)) => Ok(Step::Jump(call + 1)),
                    Some(Slot::Value(_)) => Err(InterpError::DataAsReturnAddress(cell as usize).into()),
                }
            }

            Opcode::Push => {
                let [src] = operands::<1>(ins, at)?;
                let value = m.resolve(src, at)?;
                let value = match src {
                    Operand::Imm(_) => value.map(Value::widen),
                    _ => value,
                };
                m.push(value.map(Slot::Value))?;
                Ok(Step::Next)
            }

            Opcode::Pop => {
                let [dst] = operands::<1>(ins, at)?;
                let cell = m.sp();
                let value = match m.pop()? {
                    None => None,
                    Some(Slot::Value(v)) => Some(v),
                    Some(Slot::Return(_)) => return Err(InterpError::ReturnAddressAsData(cell as usize).into()),
                };
                m.assign(dst, value, at)?;
                Ok(Step::Next)
            }

            Opcode::Lea => {
                let [dst, src] = operands::<2>(ins, at)?;
                let Operand::Mem { base, offset } = src else {
                    return Err(malformed(ins, at, "source must be a base+offset address"));
                };
                if *base == Reg::Rip {
                    debug!("[{}] rip-relative address, leaving the model", at);
                    return Ok(Step::Unmodeled);
                }
                let addr = m.base_address(*base, *offset, src, at)?;
                m.assign(dst, Some(Value::Concrete(addr)), at)?;
                Ok(Step::Next)
            }

            Opcode::Nop | Opcode::Cdq | Opcode::Cdqe | Opcode::Sal | Opcode::Shl | Opcode::Sar => Ok(Step::Next),
        }
    }

    /// Resolve the label operand of a jump or call.
    fn target(&self, ins: &Instruction, at: usize) -> Result<usize, Trap> {
        match ins.operands.as_slice() {
            [Operand::Label(name)] => Ok(self.program.label(name)?),
            [op] => Err(InterpError::UnsupportedOperand {
                operand: op.to_string(),
                at,
            }
            .into()),
            _ => Err(malformed(ins, at, "expected a single label")),
        }
    }
}

/// Whether a conditional jump is taken for a given flag.
pub fn taken(op: Opcode, flag: Value) -> bool {
    use Value::*;
    match op {
        Opcode::Je => flag == Zero,
        Opcode::Jne => matches!(flag, Positive | Negative),
        Opcode::Jg => flag == Positive,
        Opcode::Jge | Opcode::Jns => matches!(flag, Positive | Zero),
        Opcode::Jl | Opcode::Js => flag == Negative,
        Opcode::Jle => matches!(flag, Negative | Zero),
        _ => false,
    }
}

fn split_on_top<const N: usize>(value: Option<Value>, locs: [Loc; N]) -> Step {
    if value.is_some_and(Value::is_top) {
        Step::Fork(locs.into_iter().map(Site::Loc).collect())
    } else {
        Step::Next
    }
}

fn operands<const N: usize>(ins: &Instruction, at: usize) -> Result<[&Operand; N], Trap> {
    let ops: Vec<&Operand> = ins.operands.iter().collect();
    ops.try_into().map_err(|_| {
        malformed(
            ins,
            at,
            match N {
                1 => "expected 1 operand",
                2 => "expected 2 operands",
                _ => "wrong operand count",
            },
        )
    })
}

fn malformed(ins: &Instruction, at: usize, reason: &'static str) -> Trap {
    InterpError::MalformedInstruction {
        opcode: ins.opcode,
        at,
        reason,
    }
    .into()
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;

    fn run_one(program: &Program, machine: &mut Machine, at: usize) -> Result<Step, InterpError> {
        let config = ExploreConfig::default();
        Executor::new(program, &config).step(machine, at)
    }

    fn single(opcode: Opcode, operands: Vec<Operand>) -> Program {
        Program::new(vec![Instruction::new(opcode, operands)], Default::default())
    }

    fn machine() -> Machine {
        Machine::new(&ExploreConfig::default())
    }

    #[test]
    fn test_mov_immediate_is_widened() {
        let mut m = machine();
        let p = single(Opcode::Mov, vec![Reg::Eax.into(), Operand::Imm(42)]);
        assert_eq!(run_one(&p, &mut m, 0).unwrap(), Step::Next);
        assert_eq!(m.reg(Reg::Eax).unwrap(), Some(Value::Positive));
    }

    #[test]
    fn test_mov_top_forks() {
        let mut m = machine();
        let p = single(Opcode::Mov, vec![Reg::Eax.into(), Reg::Ecx.into()]);
        assert_eq!(
            run_one(&p, &mut m, 0).unwrap(),
            Step::Fork(vec![Site::Loc(Loc::Reg(Reg::Eax))])
        );
    }

    #[test]
    fn test_mov_keeps_pointers_concrete() {
        let mut m = machine();
        let p = single(Opcode::Mov, vec![Reg::Rbp.into(), Reg::Rsp.into()]);
        run_one(&p, &mut m, 0).unwrap();
        let p = single(Opcode::Mov, vec![Reg::Eax.into(), Reg::Rbp.into()]);
        run_one(&p, &mut m, 0).unwrap();
        assert_eq!(m.reg(Reg::Eax).unwrap(), Some(Value::Concrete(9000)));
    }

    #[test]
    fn test_stack_adjust() {
        let mut m = machine();
        let p = single(Opcode::Sub, vec![Reg::Rsp.into(), Operand::Imm(48)]);
        assert_eq!(run_one(&p, &mut m, 0).unwrap(), Step::Next);
        assert_eq!(m.sp(), 9000 - 48);
        let p = single(Opcode::Add, vec![Reg::Rsp.into(), Operand::Imm(48)]);
        run_one(&p, &mut m, 0).unwrap();
        assert_eq!(m.sp(), 9000);
    }

    #[test]
    fn test_frame_pointer_adjust_stays_concrete() {
        let mut m = machine();
        let p = single(Opcode::Sub, vec![Reg::Rbp.into(), Operand::Imm(32)]);
        assert_eq!(run_one(&p, &mut m, 0).unwrap(), Step::Next);
        let p = single(Opcode::Add, vec![Reg::Rbp.into(), Operand::Imm(16)]);
        assert_eq!(run_one(&p, &mut m, 0).unwrap(), Step::Next);
        assert_eq!(m.reg(Reg::Rbp).unwrap(), Some(Value::Concrete(9000 - 16)));
    }

    #[test]
    fn test_stack_adjust_overflow_faults() {
        let mut m = machine();
        let p = single(Opcode::Sub, vec![Reg::Rsp.into(), Operand::Imm(i64::MIN)]);
        assert_eq!(
            run_one(&p, &mut m, 0).unwrap(),
            Step::Fault(Fault::OutOfBounds { index: i64::MAX })
        );
        assert_eq!(m.sp(), 9000);

        let p = single(Opcode::Add, vec![Reg::Rbp.into(), Operand::Imm(i64::MAX)]);
        assert_eq!(
            run_one(&p, &mut m, 0).unwrap(),
            Step::Fault(Fault::OutOfBounds { index: i64::MAX })
        );
        assert_eq!(m.bp(), 9000);
    }

    #[test]
    fn test_add_writes_sign() {
        let mut m = machine();
        m.set_reg(Reg::Eax, Some(Value::Negative)).unwrap();
        let p = single(Opcode::Add, vec![Reg::Eax.into(), Operand::Imm(-1)]);
        assert_eq!(run_one(&p, &mut m, 0).unwrap(), Step::Next);
        assert_eq!(m.reg(Reg::Eax).unwrap(), Some(Value::Negative));

        let p = single(Opcode::Sub, vec![Reg::Eax.into(), Operand::Imm(-1)]);
        assert!(matches!(run_one(&p, &mut m, 0).unwrap(), Step::Fork(_)));
        assert_eq!(m.reg(Reg::Eax).unwrap(), Some(Value::Top));
    }

    #[test]
    fn test_add_uninitialized_faults() {
        let mut m = machine();
        let p = single(Opcode::Add, vec![Reg::Ebx.into(), Operand::Imm(1)]);
        assert_eq!(
            run_one(&p, &mut m, 0).unwrap(),
            Step::Fault(Fault::Uninitialized(Loc::Reg(Reg::Ebx)))
        );
    }

    #[test]
    fn test_imul_forms() {
        let mut m = machine();
        m.set_reg(Reg::Eax, Some(Value::Negative)).unwrap();
        let p = single(Opcode::Imul, vec![Reg::Eax.into(), Operand::Imm(-3)]);
        run_one(&p, &mut m, 0).unwrap();
        assert_eq!(m.reg(Reg::Eax).unwrap(), Some(Value::Positive));

        let p = single(Opcode::Imul, vec![Reg::Ebx.into(), Reg::Eax.into(), Operand::Imm(0)]);
        run_one(&p, &mut m, 0).unwrap();
        assert_eq!(m.reg(Reg::Ebx).unwrap(), Some(Value::Zero));

        let p = single(Opcode::Imul, vec![Reg::Eax.into()]);
        assert!(matches!(
            run_one(&p, &mut m, 0),
            Err(InterpError::MalformedInstruction { opcode: Opcode::Imul, .. })
        ));
    }

    #[test]
    fn test_idiv_by_zero_before_dividend() {
        let mut m = machine();
        m.set_reg(Reg::Ebx, Some(Value::Zero)).unwrap();
        // eax is still empty; the zero divisor wins.
        let p = single(Opcode::Idiv, vec![Reg::Ebx.into()]);
        assert_eq!(run_one(&p, &mut m, 0).unwrap(), Step::Fault(Fault::DivisionByZero));

        m.set_reg(Reg::Eax, Some(Value::Top)).unwrap();
        assert_eq!(run_one(&p, &mut m, 0).unwrap(), Step::Fault(Fault::DivisionByZero));
    }

    #[test]
    fn test_idiv_writes_eax_and_edx() {
        let mut m = machine();
        m.set_reg(Reg::Eax, Some(Value::Negative)).unwrap();
        let p = single(Opcode::Idiv, vec![Operand::Imm(-2)]);
        assert_eq!(run_one(&p, &mut m, 0).unwrap(), Step::Next);
        assert_eq!(m.reg(Reg::Eax).unwrap(), Some(Value::Positive));
        assert_eq!(m.reg(Reg::Edx).unwrap(), Some(Value::Positive));

        m.set_reg(Reg::Eax, Some(Value::Top)).unwrap();
        assert_eq!(
            run_one(&p, &mut m, 0).unwrap(),
            Step::Fork(vec![Site::Loc(Loc::Reg(Reg::Eax)), Site::Loc(Loc::Reg(Reg::Edx))])
        );
    }

    #[test]
    fn test_cmp_sets_flag() {
        let mut m = machine();
        m.set_reg(Reg::Eax, Some(Value::Positive)).unwrap();
        let p = single(Opcode::Cmp, vec![Reg::Eax.into(), Operand::Imm(0)]);
        assert_eq!(run_one(&p, &mut m, 0).unwrap(), Step::Next);
        assert_eq!(m.flag(), Some(Value::Positive));

        let p = single(Opcode::Cmp, vec![Reg::Ecx.into(), Operand::Imm(0)]);
        assert_eq!(run_one(&p, &mut m, 0).unwrap(), Step::Fork(vec![Site::Flag]));
    }

    #[test]
    fn test_conditional_jumps() {
        use Value::*;
        let cases = [
            (Opcode::Je, [false, false, true]),
            (Opcode::Jne, [true, true, false]),
            (Opcode::Jg, [true, false, false]),
            (Opcode::Jge, [true, false, true]),
            (Opcode::Jl, [false, true, false]),
            (Opcode::Jle, [false, true, true]),
            (Opcode::Js, [false, true, false]),
            (Opcode::Jns, [true, false, true]),
        ];
        for (op, expected) in cases {
            for (flag, want) in [Positive, Negative, Zero].into_iter().zip(expected) {
                assert_eq!(taken(op, flag), want, "{} on {}", op, flag);
            }
        }
    }

    #[test]
    fn test_jump_before_compare() {
        let p = Program::builder().label("L").ins(Opcode::Jg, [Operand::label("L")]).build();
        let mut m = machine();
        assert_eq!(run_one(&p, &mut m, 0).unwrap(), Step::Fault(Fault::FlagUnset));
    }

    #[test]
    fn test_jump_to_missing_label() {
        let p = single(Opcode::Jmp, vec![Operand::label("nowhere")]);
        let mut m = machine();
        assert_eq!(
            run_one(&p, &mut m, 0),
            Err(InterpError::UnknownLabel("nowhere".to_string()))
        );
    }

    #[test]
    fn test_call_and_return() {
        let p = Program::builder()
            .ins(Opcode::Call, [Operand::label("f")])
            .ins(Opcode::Nop, [])
            .label("f")
            .ins(Opcode::Ret, [])
            .build();
        let mut m = machine();
        assert_eq!(run_one(&p, &mut m, 0).unwrap(), Step::Jump(2));
        assert_eq!(m.sp(), 9000 - 8);
        assert_eq!(run_one(&p, &mut m, 2).unwrap(), Step::Jump(1));
        assert_eq!(m.sp(), 9000);
        assert_eq!(run_one(&p, &mut m, 2).unwrap(), Step::Return);
    }

    #[test]
    fn test_ret_over_data_is_an_error() {
        let p = Program::builder()
            .ins(Opcode::Push, [Operand::Imm(3)])
            .ins(Opcode::Ret, [])
            .build();
        let mut m = machine();
        run_one(&p, &mut m, 0).unwrap();
        assert_eq!(run_one(&p, &mut m, 1), Err(InterpError::DataAsReturnAddress(8992)));
    }

    #[test]
    fn test_user_exception() {
        let p = single(Opcode::Call, vec![Operand::label("userDefinedException")]);
        let mut m = machine();
        assert_eq!(run_one(&p, &mut m, 0).unwrap(), Step::Fault(Fault::UserRaised));
        assert_eq!(m.sp(), 9000);
    }

    #[test]
    fn test_push_pop_roundtrip() {
        let p = Program::builder()
            .ins(Opcode::Push, [Reg::Rbp.into()])
            .ins(Opcode::Mov, [Reg::Rbp.into(), Reg::Rsp.into()])
            .ins(Opcode::Pop, [Reg::Rbp.into()])
            .build();
        let mut m = machine();
        for at in 0..3 {
            assert_eq!(run_one(&p, &mut m, at).unwrap(), Step::Next);
        }
        assert_eq!(m.bp(), 9000);
        assert_eq!(m.sp(), 9000);
    }

    #[test]
    fn test_lea() {
        let mut m = machine();
        let p = single(Opcode::Lea, vec![Reg::Eax.into(), Operand::mem(Reg::Rbp, -16)]);
        assert_eq!(run_one(&p, &mut m, 0).unwrap(), Step::Next);
        assert_eq!(m.reg(Reg::Eax).unwrap(), Some(Value::Concrete(9000 - 16)));

        let p = single(Opcode::Lea, vec![Reg::Ecx.into(), Operand::mem(Reg::Rip, 0)]);
        assert_eq!(run_one(&p, &mut m, 0).unwrap(), Step::Unmodeled);
    }

    #[test]
    fn test_array_read_out_of_bounds() {
        let mut m = machine();
        m.set_reg(Reg::Eax, Some(Value::Positive)).unwrap();
        let p = single(Opcode::Mov, vec![Reg::Ebx.into(), Operand::array(Reg::Rbp, Reg::Eax, -4)]);
        // The frame is empty: rsp == rbp.
        assert_eq!(
            run_one(&p, &mut m, 0).unwrap(),
            Step::Fault(Fault::OutOfBounds { index: 9000 })
        );
        assert_eq!(m.reg(Reg::Ebx).unwrap(), None);
    }
}
