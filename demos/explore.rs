//! Explore one of the bundled sample listings and print every branch outcome.
//!
//! Run with:
//! ```bash
//! cargo run --example explore -- --sample guarded-divide --step-limit 60
//! ```

use clap::{Parser, ValueEnum};
use signfork::explore::{ExploreConfig, Explorer, Outcome};
use signfork::program::{Opcode, Operand, Program};
use signfork::types::Reg;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Sample {
    /// `a / b` with both arguments unknown
    Divide,
    /// `a / b`, raising an exception when `b == 0`
    GuardedDivide,
    /// Store into a four-element local array at an unknown index
    ArrayStore,
    /// Count an unknown argument down to zero
    Countdown,
}

#[derive(Debug, Parser)]
#[command(author, version, about = "Fork-on-top sign analysis of sample listings")]
struct Cli {
    /// Sample listing to explore
    #[arg(value_enum, default_value = "guarded-divide")]
    sample: Sample,

    /// Per-branch instruction budget
    #[arg(long, default_value = "100")]
    step_limit: usize,

    /// Stop after this many branches
    #[arg(long)]
    branch_limit: Option<usize>,

    /// Print the listing before exploring
    #[arg(long)]
    listing: bool,

    /// Log every executed instruction
    #[arg(short, long)]
    verbose: bool,
}

fn sample(which: Sample) -> Program {
    let b = Program::builder().label("entry");
    match which {
        Sample::Divide => b
            .ins(Opcode::Mov, [Reg::Eax.into(), Reg::Ecx.into()])
            .ins(Opcode::Mov, [Reg::Ebx.into(), Reg::Edx.into()])
            .ins(Opcode::Cdq, [])
            .ins(Opcode::Idiv, [Reg::Ebx.into()])
            .ins(Opcode::Ret, [])
            .build(),
        Sample::GuardedDivide => b
            .ins(Opcode::Cmp, [Reg::Edx.into(), Operand::Imm(0)])
            .ins(Opcode::Jne, [Operand::label("ok")])
            .ins(Opcode::Call, [Operand::label("userDefinedException")])
            .label("ok")
            .ins(Opcode::Mov, [Reg::Eax.into(), Reg::Ecx.into()])
            .ins(Opcode::Mov, [Reg::Ebx.into(), Reg::Edx.into()])
            .ins(Opcode::Idiv, [Reg::Eax.into(), Reg::Ebx.into()])
            .ins(Opcode::Ret, [])
            .build(),
        Sample::ArrayStore => b
            .ins(Opcode::Push, [Reg::Rbp.into()])
            .ins(Opcode::Mov, [Reg::Rbp.into(), Reg::Rsp.into()])
            .ins(Opcode::Sub, [Reg::Rsp.into(), Operand::Imm(16)])
            .ins(Opcode::Mov, [Reg::Eax.into(), Reg::Ecx.into()])
            .ins(Opcode::Mov, [Operand::array(Reg::Rbp, Reg::Eax, -8), Operand::Imm(1)])
            .ins(Opcode::Add, [Reg::Rsp.into(), Operand::Imm(16)])
            .ins(Opcode::Pop, [Reg::Rbp.into()])
            .ins(Opcode::Ret, [])
            .build(),
        Sample::Countdown => b
            .ins(Opcode::Mov, [Reg::Eax.into(), Reg::Ecx.into()])
            .label("loop")
            .ins(Opcode::Cmp, [Reg::Eax.into(), Operand::Imm(0)])
            .ins(Opcode::Jle, [Operand::label("done")])
            .ins(Opcode::Sub, [Reg::Eax.into(), Operand::Imm(1)])
            .ins(Opcode::Jmp, [Operand::label("loop")])
            .label("done")
            .ins(Opcode::Ret, [])
            .build(),
    }
}

fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();

    simplelog::TermLogger::init(
        if cli.verbose {
            simplelog::LevelFilter::Debug
        } else {
            simplelog::LevelFilter::Warn
        },
        simplelog::Config::default(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    )?;

    let program = sample(cli.sample);
    if cli.listing {
        for (i, ins) in program.instructions().iter().enumerate() {
            println!("{:>4}  {}", i, ins);
        }
        println!();
    }

    let config = ExploreConfig {
        step_limit: cli.step_limit,
        branch_limit: cli.branch_limit,
        ..ExploreConfig::default()
    };
    let time_explore = std::time::Instant::now();
    let analysis = Explorer::with_config(&program, config).run("entry")?;
    let elapsed = time_explore.elapsed();

    for (i, outcome) in analysis.outcomes.iter().enumerate() {
        match outcome {
            Outcome::Completed { result: Some(v) } => println!("#{:<3} completed, eax = {}", i, v),
            Outcome::Completed { result: None } => println!("#{:<3} completed, eax empty", i),
            Outcome::Fault { fault, at } => println!("#{:<3} {} at instruction {}", i, fault, at),
            Outcome::Unmodeled { at } => println!("#{:<3} left the model at instruction {}", i, at),
        }
    }

    let stats = &analysis.stats;
    println!();
    println!(
        "{} branches, {} forks, {} steps, {} exhausted{} in {:.2?}",
        stats.branches,
        stats.forks,
        stats.steps,
        stats.exhausted,
        if analysis.truncated { " (truncated)" } else { "" },
        elapsed
    );
    Ok(())
}
