//! # signfork: fork-on-top abstract interpretation
//!
//! **`signfork`** runs x86-style assembly listings over the **sign lattice** and
//! reports which faults (division by zero, out-of-bounds array access, explicit
//! user exceptions) are reachable from a given entry label.
//!
//! ## How it works
//!
//! Every register and memory cell holds an abstract [`Value`][crate::sign::Value]:
//! `+`, `-`, `0`, `⊤` ("sign unknown"), or an exact integer. The analysis never
//! joins states. Whenever an instruction produces `⊤`, the current branch is
//! split into three copies in which the `⊤` is replaced by `+`, `-` and `0`.
//! Each copy runs to completion independently. A per-branch step budget stops
//! loops.
//!
//! ## Basic Usage
//!
//! ```rust
//! use signfork::explore::Explorer;
//! use signfork::program::{Opcode, Operand, Program};
//! use signfork::sign::Value;
//! use signfork::types::Reg;
//!
//! // f(x) = if x >= 0 { 1 } else { -1 }
//! let program = Program::builder()
//!     .label("f")
//!     .ins(Opcode::Cmp, [Reg::Ecx.into(), Operand::Imm(0)])
//!     .ins(Opcode::Jge, [Operand::label("L")])
//!     .ins(Opcode::Mov, [Reg::Eax.into(), Operand::Imm(-1)])
//!     .ins(Opcode::Ret, [])
//!     .label("L")
//!     .ins(Opcode::Mov, [Reg::Eax.into(), Operand::Imm(1)])
//!     .ins(Opcode::Ret, [])
//!     .build();
//!
//! let analysis = Explorer::new(&program).run("f").unwrap();
//!
//! // The flag is split into +, -, 0, in that order.
//! let results: Vec<_> = analysis.results().collect();
//! assert_eq!(results, vec![Some(Value::Positive), Some(Value::Negative), Some(Value::Positive)]);
//! assert!(analysis.is_clean());
//! ```
//!
//! ## Core Components
//!
//! - **[`sign`]**: The lattice and its transfer functions.
//! - **[`machine`]**: Registers, memory and the comparison flag of one branch.
//! - **[`step`]**: Semantics of a single instruction.
//! - **[`explore`]**: The work-list driver, its configuration and the report.
//!
//! Faults of the analysed program and defects of the listing are kept apart,
//! see the [`error`] module.

pub mod error;
pub mod explore;
pub mod machine;
pub mod operand;
pub mod program;
pub mod sign;
pub mod step;
pub mod types;
