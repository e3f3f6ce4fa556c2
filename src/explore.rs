//! Exploration driver.
//!
//! The driver sequences instructions for one branch at a time and never joins
//! branches. Whenever a step leaves `⊤` somewhere, the branch stops and three
//! copies of its machine are queued, with the `⊤` replaced by `+`, `-` and `0`
//! respectively. Each copy continues from the next instruction, to completion,
//! before the following one starts.
//!
//! Pending branches live on an explicit LIFO work list, so nesting forks does
//! not grow the native call stack. Pushing the cases in reverse keeps the
//! exploration order `+`, `-`, `0`, depth-first.
//!
//! # Step budget
//!
//! Every branch carries a step counter, inherited by its forks, and incremented
//! once per dispatched instruction. A branch that exceeds
//! [`ExploreConfig::step_limit`] is dropped without a report. This is the only
//! thing that stops loops: there is no widening.

use log::{debug, info, warn};

use crate::error::{Fault, InterpError, Trap};
use crate::machine::Machine;
use crate::program::Program;
use crate::sign::Value;
use crate::step::{Executor, Site, Step};
use crate::types::Reg;

/// Parameters of an exploration run.
///
/// Use `ExploreConfig::default()` for the standard machine.
///
/// # Examples
///
/// ```
/// use signfork::explore::ExploreConfig;
///
/// let config = ExploreConfig {
///     step_limit: 40,
///     ..ExploreConfig::default()
/// };
/// assert_eq!(config.memory_size, 10_000);
/// ```
#[derive(Debug, Clone)]
pub struct ExploreConfig {
    /// Maximum instructions dispatched per branch (default: 100)
    pub step_limit: usize,
    /// Stop exploring after this many branches (default: unlimited)
    pub branch_limit: Option<usize>,
    /// Number of memory cells (default: 10 000)
    pub memory_size: usize,
    /// Initial value of `rsp` and `rbp` (default: 9000)
    pub stack_base: i64,
    /// Stack slot width used by push, pop, call and ret (default: 8)
    pub word_size: i64,
    /// Multiplier of the second index in array addresses (default: 4)
    pub array_scale: i64,
    /// Arguments passed on the stack beyond the four register ones (default: 80)
    pub stack_arguments: usize,
    /// Register reported when a branch completes (default: `eax`)
    pub result_register: Reg,
    /// Call target that raises a user exception (default: "userDefinedException")
    pub exception_target: String,
}

impl Default for ExploreConfig {
    fn default() -> Self {
        Self {
            step_limit: 100,
            branch_limit: None,
            memory_size: 10_000,
            stack_base: 9000,
            word_size: 8,
            array_scale: 4,
            stack_arguments: 80,
            result_register: Reg::Eax,
            exception_target: "userDefinedException".to_string(),
        }
    }
}

/// How one branch ended.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Outcome {
    /// Outermost return, or fell off the end of the listing.
    Completed { result: Option<Value> },
    Fault { fault: Fault, at: usize },
    /// Reached a `rip`-relative address, treated as a library boundary.
    Unmodeled { at: usize },
}

#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct Stats {
    /// Branches started, including the entry branch.
    pub branches: usize,
    /// Fork points hit.
    pub forks: usize,
    /// Instructions dispatched across all branches.
    pub steps: usize,
    /// Branches dropped by the step budget.
    pub exhausted: usize,
}

/// Everything one run observed.
#[derive(Debug, Clone, Default)]
pub struct Analysis {
    /// Branch outcomes in exploration order.
    pub outcomes: Vec<Outcome>,
    pub stats: Stats,
    /// Set if the branch limit cut the run short.
    pub truncated: bool,
}

impl Analysis {
    pub fn faults(&self) -> impl Iterator<Item = (Fault, usize)> + '_ {
        self.outcomes.iter().filter_map(|o| match *o {
            Outcome::Fault { fault, at } => Some((fault, at)),
            _ => None,
        })
    }

    /// Results left in the result register by completed branches.
    pub fn results(&self) -> impl Iterator<Item = Option<Value>> + '_ {
        self.outcomes.iter().filter_map(|o| match *o {
            Outcome::Completed { result } => Some(result),
            _ => None,
        })
    }

    pub fn has_fault(&self, predicate: impl Fn(&Fault) -> bool) -> bool {
        self.faults().any(|(f, _)| predicate(&f))
    }

    /// `true` if no explored branch faulted.
    pub fn is_clean(&self) -> bool {
        self.faults().next().is_none()
    }
}

struct Task {
    machine: Machine,
    ip: usize,
    steps: usize,
}

/// Fork-on-top explorer over a fixed [`Program`].
pub struct Explorer<'a> {
    program: &'a Program,
    config: ExploreConfig,
}

impl<'a> Explorer<'a> {
    pub fn new(program: &'a Program) -> Self {
        Self::with_config(program, ExploreConfig::default())
    }

    pub fn with_config(program: &'a Program, config: ExploreConfig) -> Self {
        Self { program, config }
    }

    /// Explore every branch reachable from `label` on a fresh machine.
    ///
    /// # Errors
    ///
    /// Returns an [`InterpError`] if the label is unknown or the listing is
    /// malformed on any explored path. Faults of the analysed program are not
    /// errors; they are reported in the returned [`Analysis`].
    pub fn run(&self, label: &str) -> Result<Analysis, InterpError> {
        let start = self.program.label(label)?;
        info!("run({}) from instruction {}", label, start);
        self.run_from(start, Machine::new(&self.config))
    }

    /// Explore from an arbitrary instruction and machine.
    pub fn run_from(&self, start: usize, machine: Machine) -> Result<Analysis, InterpError> {
        let executor = Executor::new(self.program, &self.config);
        let mut analysis = Analysis::default();
        let mut worklist = vec![Task {
            machine,
            ip: start,
            steps: 0,
        }];

        while let Some(task) = worklist.pop() {
            if let Some(limit) = self.config.branch_limit {
                if analysis.stats.branches >= limit {
                    warn!("Reached branch limit ({}), {} branches left unexplored", limit, worklist.len() + 1);
                    analysis.truncated = true;
                    break;
                }
            }
            analysis.stats.branches += 1;
            self.drive(&executor, task, &mut worklist, &mut analysis)?;
        }

        info!(
            "explored {} branches ({} forks, {} steps, {} exhausted), {} outcomes",
            analysis.stats.branches,
            analysis.stats.forks,
            analysis.stats.steps,
            analysis.stats.exhausted,
            analysis.outcomes.len()
        );
        Ok(analysis)
    }

    /// Run one branch until it ends or forks.
    fn drive(
        &self,
        executor: &Executor<'_>,
        mut task: Task,
        worklist: &mut Vec<Task>,
        analysis: &mut Analysis,
    ) -> Result<(), InterpError> {
        loop {
            if task.ip >= self.program.len() {
                return self.complete(&task, analysis);
            }

            task.steps += 1;
            if task.steps > self.config.step_limit {
                debug!("step budget exhausted at instruction {}", task.ip);
                analysis.stats.exhausted += 1;
                return Ok(());
            }
            analysis.stats.steps += 1;

            match executor.step(&mut task.machine, task.ip)? {
                Step::Next => task.ip += 1,
                Step::Jump(target) => task.ip = target,
                Step::Fork(sites) => {
                    analysis.stats.forks += 1;
                    let at = task.ip;
                    return match fork(task, &sites, worklist) {
                        Ok(()) => Ok(()),
                        Err(Trap::Fault(fault)) => {
                            analysis.outcomes.push(Outcome::Fault { fault, at });
                            Ok(())
                        }
                        Err(Trap::Error(err)) => Err(err),
                    };
                }
                Step::Return => return self.complete(&task, analysis),
                Step::Unmodeled => {
                    info!("branch left the model at instruction {}", task.ip);
                    analysis.outcomes.push(Outcome::Unmodeled { at: task.ip });
                    return Ok(());
                }
                Step::Fault(fault) => {
                    info!("{} at instruction {}", fault, task.ip);
                    analysis.outcomes.push(Outcome::Fault { fault, at: task.ip });
                    return Ok(());
                }
            }
        }
    }

    fn complete(&self, task: &Task, analysis: &mut Analysis) -> Result<(), InterpError> {
        let result = task.machine.reg(self.config.result_register)?;
        match result {
            Some(v) => info!("result: {}", v),
            None => info!("result: <empty>"),
        }
        analysis.outcomes.push(Outcome::Completed { result });
        Ok(())
    }
}

/// Queue one copy of the branch per sign case, each resuming after the fork.
fn fork(task: Task, sites: &[Site], worklist: &mut Vec<Task>) -> Result<(), Trap> {
    debug!("fork at instruction {} on {:?}", task.ip, sites);
    let mut cases = Vec::with_capacity(Value::CASES.len());
    for case in Value::CASES {
        let mut machine = task.machine.clone();
        for site in sites {
            match *site {
                Site::Flag => machine.set_flag(case),
                Site::Loc(loc) => machine.write(loc, case)?,
            }
        }
        cases.push(Task {
            machine,
            ip: task.ip + 1,
            steps: task.steps,
        });
    }
    worklist.extend(cases.into_iter().rev());
    Ok(())
}
