use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use comet16::sim::debug::Debugger;
use comet16::sim::Machine;

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    cmd: Command,
}
#[derive(Subcommand)]
enum Command {
    /// Runs a program image until the machine halts.
    Run {
        /// The program image: a flat sequence of big-endian 16-bit words,
        /// loaded at address 0.
        input: PathBuf,
        /// The starting program counter.
        #[arg(long, default_value_t = 0)]
        pc: u16,
    },
    /// Loads a program image and enters the interactive debugger.
    Debug {
        /// The program image: a flat sequence of big-endian 16-bit words,
        /// loaded at address 0.
        input: PathBuf,
        /// The starting program counter.
        #[arg(long, default_value_t = 0)]
        pc: u16,
    },
}

fn main() -> anyhow::Result<()> {
    let Args { cmd } = Args::parse();

    match cmd {
        Command::Run { input, pc } => {
            let prog = load_image(&input)?;
            Machine::new(&prog, pc).run();
            Ok(())
        }
        Command::Debug { input, pc } => {
            let prog = load_image(&input)?;
            let mut vm = Machine::new(&prog, pc);
            Debugger::new(&mut vm).run()?;
            Ok(())
        }
    }
}

fn load_image(input: &Path) -> anyhow::Result<Vec<i16>> {
    let bytes = std::fs::read(input)
        .with_context(|| format!("cannot read program image {}", input.display()))?;
    anyhow::ensure!(
        bytes.len() % 2 == 0,
        "malformed program image {}: odd byte length {}",
        input.display(),
        bytes.len()
    );

    Ok(bytes
        .chunks_exact(2)
        .map(|pair| i16::from_be_bytes([pair[0], pair[1]]))
        .collect())
}
