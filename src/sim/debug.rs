//! An interactive debugger over a [`Machine`].
//!
//! A [`Debugger`] wraps a live machine in a line-oriented command loop:
//! single-step or run to halt (with optional tracing and instruction
//! counting), inspect and patch registers and memory, disassemble, and
//! reset the machine to the state it had when the session began.
//!
//! Commands are read from the machine's console device one line at a time;
//! all output goes to the session's writer (the process's stdout unless
//! another writer is supplied via [`Debugger::with_output`]).
//!
//! ```
//! use comet16::isa::Opcode;
//! use comet16::sim::Machine;
//! use comet16::sim::debug::Debugger;
//! use comet16::sim::io::BufferedIO;
//!
//! let io = BufferedIO::new();
//! io.get_input().write().unwrap().extend(b"go\nregs\nquit\n");
//!
//! let mut vm = Machine::with_io(io, &[Opcode::Halt.word(0, 0)], 0);
//! let mut out = Vec::new();
//! Debugger::with_output(&mut vm, &mut out).run().unwrap();
//!
//! assert!(vm.halted);
//! ```

use std::io::Write;

use crate::sim::mem::MEM_SIZE;
use crate::sim::{Machine, Snapshot};

const HELP: &str = "\
commands:
  h)elp           show this command list
  g)o             run the program until it stops
  s)tep  <n>      execute n instructions (default 1)
  j)ump  <b>      jump to address b
  r)egs           show register contents
  i)Mem  <b <n>>  show n instructions from address b
  d)Mem  <b <n>>  show n memory words from address b
  a)lter <b <v>>  set the memory word at b to v
  t)race          toggle instruction tracing
  p)rint          toggle instruction counting
  c)lear          reset the machine
  q)uit           exit the debugger";

/// An interactive debugging session over a machine.
///
/// Captures a snapshot of the machine at construction; the `clear` command
/// restores it. The machine halting does not end the session, since the
/// operator may still want to inspect state, `clear`, or `jump`; only
/// `quit` (or the end of command input) does.
pub struct Debugger<'a> {
    vm: &'a mut Machine,
    backup: Snapshot,
    trace: bool,
    count: bool,
    out: Box<dyn Write + 'a>,
}

impl<'a> Debugger<'a> {
    /// Creates a debugging session writing to the process's stdout.
    pub fn new(vm: &'a mut Machine) -> Self {
        Self::with_output(vm, std::io::stdout())
    }

    /// Creates a debugging session writing to the given writer.
    pub fn with_output(vm: &'a mut Machine, out: impl Write + 'a) -> Self {
        let backup = vm.snapshot();
        Self {
            vm,
            backup,
            trace: false,
            count: false,
            out: Box::new(out),
        }
    }

    /// Runs the command loop until `quit` or the end of command input.
    ///
    /// Errors out only if the session's writer fails; a halted machine or
    /// a malformed command just returns to the prompt.
    pub fn run(&mut self) -> std::io::Result<()> {
        writeln!(self.out, "debugging (type help for commands)...")?;
        writeln!(self.out)?;

        loop {
            write!(self.out, "command: ")?;
            self.out.flush()?;

            let Ok(line) = self.vm.io().read_line() else {
                break; // out of input
            };
            if !self.exec(&line)? {
                break;
            }
        }
        Ok(())
    }

    /// Executes a single command line. Returns `false` if the session
    /// should end.
    pub fn exec(&mut self, line: &str) -> std::io::Result<bool> {
        let (cmd, x1, x2) = parse_command(line);

        match cmd {
            "help" | "h" => writeln!(self.out, "{HELP}")?,

            "go" | "g" => {
                let mut steps = 0;
                while !self.vm.halted {
                    steps += 1;
                    self.trace_step()?;
                }
                if self.count {
                    writeln!(self.out, "instructions executed = {steps}")?;
                }
            }

            "step" | "s" => {
                let limit = x1.unwrap_or(1);
                let mut steps = 0;
                while steps < limit && !self.vm.halted {
                    steps += 1;
                    self.trace_step()?;
                }
                if self.count {
                    writeln!(self.out, "instructions executed = {steps}")?;
                }
            }

            "jump" | "j" => match x1 {
                Some(addr) => {
                    let addr = addr as u16;
                    writeln!(self.out, "jump to {addr:x}")?;
                    self.vm.pc = addr;
                }
                None => writeln!(self.out, "error: missing jump address")?,
            },

            "regs" | "r" => {
                use crate::isa::reg_consts::{GR0, GR1, GR2, GR3, SP};

                let status = match self.vm.fr {
                    1.. => "00",
                    ..=-1 => "10",
                    0 => "01",
                };
                let (reg, pc) = (&self.vm.reg_file, self.vm.pc);
                writeln!(self.out, "registers")?;
                writeln!(self.out, "GR[0] = {:4x}\tPC = {:4x}", reg[GR0], pc)?;
                writeln!(self.out, "GR[1] = {:4x}\tSP = {:4x}", reg[GR1], reg[SP])?;
                writeln!(self.out, "GR[2] = {:4x}\tFR =   {}", reg[GR2], status)?;
                writeln!(self.out, "GR[3] = {:4x}", reg[GR3])?;
            }

            "iMem" | "imem" | "i" => {
                let addr = x1.map_or(self.vm.pc, |a| a as u16);
                let n = x2.map_or(1, |n| n.max(0) as u32);
                writeln!(self.out, "instruction memory")?;
                writeln!(self.out, "{}", self.vm.disasm(addr, n))?;
            }

            "dMem" | "dmem" | "d" => {
                let mut addr = x1.map_or(self.vm.pc, |a| a as u16);
                let n = x2.unwrap_or(1).clamp(0, MEM_SIZE as i64);
                for _ in 0..n {
                    writeln!(self.out, "mem[{:<4x}] = {:x}", addr, self.vm.mem[addr])?;
                    addr = addr.wrapping_add(1);
                }
            }

            "alter" | "a" => match (x1, x2) {
                (Some(addr), Some(val)) => {
                    let (addr, val) = (addr as u16, val as i16);
                    writeln!(self.out, "alter mem[{addr:x}] = {val:x}")?;
                    self.vm.mem[addr] = val;
                }
                _ => writeln!(self.out, "alter failed: expected address and value")?,
            },

            "trace" | "t" => {
                self.trace = !self.trace;
                let state = if self.trace { "on" } else { "off" };
                writeln!(self.out, "instruction tracing {state}")?;
            }

            "print" | "p" => {
                self.count = !self.count;
                let state = if self.count { "on" } else { "off" };
                writeln!(self.out, "instruction counting {state}")?;
            }

            "clear" | "c" => {
                writeln!(self.out, "machine reset")?;
                self.vm.restore(&self.backup);
            }

            "quit" | "q" => {
                writeln!(self.out, "exiting debugger...")?;
                return Ok(false);
            }

            _ => writeln!(self.out, "unknown command {cmd}")?,
        }

        Ok(true)
    }

    /// One engine step, with the session's tracing applied and any fault
    /// diagnostic routed to the session writer.
    fn trace_step(&mut self) -> std::io::Result<()> {
        if self.trace {
            writeln!(self.out, "{}", self.vm.disasm(self.vm.pc, 1))?;
        }
        if let Err(e) = self.vm.step() {
            writeln!(self.out, "{e}")?;
        }
        Ok(())
    }
}

/// Tokenizes a command line as `command [int] [int]`.
///
/// The second integer is only recognized when the first parses, so a line
/// like `alter x 5` reports a missing address rather than treating `5` as
/// one.
fn parse_command(line: &str) -> (&str, Option<i64>, Option<i64>) {
    let mut tokens = line.split_whitespace();
    let cmd = tokens.next().unwrap_or("");
    let x1 = tokens.next().and_then(|t| t.parse().ok());
    let x2 = match x1 {
        Some(_) => tokens.next().and_then(|t| t.parse().ok()),
        None => None,
    };
    (cmd, x1, x2)
}
