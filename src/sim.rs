//! Executing machine code.
//!
//! This module is center around the [`Machine`] struct, which executes
//! machine code one instruction at a time via a fetch-decode-execute cycle.
//!
//! ```
//! use comet16::sim::Machine;
//! use comet16::isa::Opcode;
//! use comet16::isa::reg_consts::GR1;
//!
//! // LD GR1, [5]; HALT; with 42 at address 5
//! let prog = [Opcode::Ld.word(1, 0), 0x0005, Opcode::Halt.word(0, 0), 0, 0, 42];
//!
//! let mut vm = Machine::new(&prog, 0);
//! vm.run();
//! assert!(vm.halted);
//! assert_eq!(vm.reg_file[GR1], 42);
//! ```
//!
//! Faults (illegal instructions, division by zero) do not panic and do not
//! propagate: [`Machine::step`] reports them as a [`SimErr`], sets the
//! halted flag, and leaves registers and memory untouched by the faulting
//! instruction. [`Machine::run`] prints the diagnostic and returns.

pub mod debug;
pub mod io;
pub mod mem;

use std::fmt::Write as _;

use crate::isa::reg_consts::SP;
use crate::isa::{split_word, Opcode, Reg};
use io::{IODevice, StdIO};
use mem::{MemArray, RegFile};

/// The upper bound of normal code/data addressing.
///
/// Addresses at or above this constant are the reserved stack region.
pub const PC_MAX: u16 = 0xFC00;
/// The initial stack pointer address. The stack grows downward from here.
pub const SP_START: u16 = 0xFC00;

/// Errors that can occur during simulation.
///
/// A `SimErr` is fatal to the running program but not to the process: the
/// machine that raised it has already halted by the time the error is
/// returned, with no other state modified by the faulting instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimErr {
    /// The word at the faulting address does not decode to an instruction
    /// (undefined opcode byte, or a register field outside of `[0, 4]`).
    IllegalInstr {
        /// Address of the faulting word.
        addr: u16,
        /// The raw word.
        word: i16,
    },
    /// A DIV or MOD instruction addressed a zero divisor.
    DivideByZero {
        /// Address of the faulting instruction.
        addr: u16,
        /// The raw instruction word.
        word: i16,
    },
}
impl std::fmt::Display for SimErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            SimErr::IllegalInstr { addr, word } => {
                write!(f, "illegal instruction: mem[{addr:x}] = {word:x}")
            }
            SimErr::DivideByZero { addr, word } => {
                write!(f, "divide by zero: mem[{addr:x}] = {word:x}")
            }
        }
    }
}
impl std::error::Error for SimErr {}

/// A host hook invoked when the machine executes a SYSCALL instruction.
///
/// The handler receives the machine itself, so it may read and write
/// registers and memory (typically to implement console IO through
/// [`Machine::io`]). It must not call [`Machine::step`] or
/// [`Machine::run`] on the machine it was handed.
///
/// Any `FnMut(&mut Machine, u8)` closure is a handler:
///
/// ```
/// use comet16::sim::Machine;
/// use comet16::isa::Opcode;
/// use comet16::isa::reg_consts::GR0;
///
/// let prog = [Opcode::Syscall.word(0, 3), Opcode::Halt.word(0, 0)];
/// let mut vm = Machine::new(&prog, 0);
/// vm.set_syscall_handler(|vm: &mut Machine, id: u8| {
///     vm.reg_file[GR0] = i16::from(id);
/// });
///
/// vm.run();
/// assert_eq!(vm.reg_file[GR0], 0x03);
/// ```
pub trait SyscallHandler {
    /// Handles one system call. `id` is the low byte of the SYSCALL
    /// instruction word.
    fn call(&mut self, vm: &mut Machine, id: u8);
}
impl<F: FnMut(&mut Machine, u8)> SyscallHandler for F {
    fn call(&mut self, vm: &mut Machine, id: u8) {
        self(vm, id)
    }
}

/// A deep copy of a machine's execution state, captured with
/// [`Machine::snapshot`] and reapplied with [`Machine::restore`].
///
/// Snapshots cover the PC, FR, general registers, memory, and the halted
/// flag. The IO device and syscall hook are session configuration and are
/// not part of a snapshot.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pc: u16,
    fr: i16,
    reg_file: RegFile,
    mem: MemArray,
    halted: bool,
}

/// The machine: registers, memory, and the execution engine over them.
pub struct Machine {
    /// The program counter.
    pub pc: u16,
    /// The flag register.
    ///
    /// Holds the signed result of the most recent result-producing
    /// instruction. Its sign and zero state are the sole condition inputs
    /// to the conditional jumps. Loads, stores, jumps, stack operations,
    /// and SYSCALL leave it unchanged.
    pub fr: i16,
    /// The general register file. `GR4` doubles as the stack pointer.
    pub reg_file: RegFile,
    /// The machine's memory.
    pub mem: MemArray,
    /// Whether the machine has shut down (HALT, or a fault).
    pub halted: bool,

    io: Box<dyn IODevice>,
    syscall: Option<Box<dyn SyscallHandler>>,
}

impl Machine {
    /// Creates a machine bound to the process's stdin/stdout.
    ///
    /// The program image is copied into the start of memory and the
    /// remaining cells are zero. Execution starts at `pc`.
    pub fn new(prog: &[i16], pc: u16) -> Self {
        Self::with_io(StdIO, prog, pc)
    }

    /// Creates a machine with the given console device.
    pub fn with_io(io: impl IODevice + 'static, prog: &[i16], pc: u16) -> Self {
        let mut mem = MemArray::new();
        mem.load(prog);

        Self {
            pc,
            fr: 0,
            reg_file: RegFile::default(),
            mem,
            halted: false,
            io: Box::new(io),
            syscall: None,
        }
    }

    /// Registers the hook invoked on SYSCALL instructions.
    ///
    /// Without a handler, SYSCALL is a no-op.
    pub fn set_syscall_handler(&mut self, handler: impl SyscallHandler + 'static) {
        self.syscall = Some(Box::new(handler));
    }

    /// Removes the syscall hook, making SYSCALL a no-op again.
    pub fn clear_syscall_handler(&mut self) {
        self.syscall = None;
    }

    /// Accesses the machine's console device.
    pub fn io(&mut self) -> &mut dyn IODevice {
        &mut *self.io
    }

    /// Captures a deep copy of the machine's execution state.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            pc: self.pc,
            fr: self.fr,
            reg_file: self.reg_file,
            mem: self.mem.clone(),
            halted: self.halted,
        }
    }

    /// Restores the machine's execution state from a snapshot.
    ///
    /// The IO device and syscall hook are kept as they are.
    pub fn restore(&mut self, snap: &Snapshot) {
        self.pc = snap.pc;
        self.fr = snap.fr;
        self.reg_file = snap.reg_file;
        self.mem = snap.mem.clone();
        self.halted = snap.halted;
    }

    fn fault(&mut self, err: SimErr) -> SimErr {
        self.halted = true;
        err
    }

    /// Executes one instruction.
    ///
    /// The PC advances past the instruction (by its width) before any
    /// control transfer of the instruction itself is applied, so jump and
    /// call targets overwrite the advanced value.
    ///
    /// On a fault the machine halts, no register or memory cell is
    /// modified by the faulting instruction (the PC included), and the
    /// fault is returned. Stepping a halted machine is a no-op.
    pub fn step(&mut self) -> Result<(), SimErr> {
        if self.halted {
            return Ok(());
        }

        let word = self.mem[self.pc];
        let (op, gr, xr) = split_word(word as u16);
        // The side read at PC+1 never faults: memory is flat and the
        // address wraps.
        let mut adr = self.mem[self.pc.wrapping_add(1)];

        let illegal = SimErr::IllegalInstr { addr: self.pc, word };
        let Ok(op) = Opcode::try_from(op) else {
            return Err(self.fault(illegal));
        };
        let Ok(gr) = Reg::try_from(gr) else {
            return Err(self.fault(illegal));
        };
        let Ok(xr) = Reg::try_from(xr) else {
            return Err(self.fault(illegal));
        };
        // xr == 0 means "no indexing", not GR0.
        if xr.reg_no() != 0 {
            adr = adr.wrapping_add(self.reg_file[xr]);
        }
        let m = adr as u16;

        match op {
            // Divisor check happens before the PC advances, so the fault
            // leaves the machine exactly as it was.
            Opcode::Div | Opcode::Mod if self.mem[m] == 0 => {
                return Err(self.fault(SimErr::DivideByZero { addr: self.pc, word }));
            }

            Opcode::Halt => {
                self.pc = self.pc.wrapping_add(1);
                self.halted = true;
            }
            Opcode::Syscall => {
                self.pc = self.pc.wrapping_add(1);
                let id = (word as u16 & 0xFF) as u8;
                // The handler is moved out for the duration of the call so
                // it can take `&mut self`. If the handler replaced the hook
                // itself, the replacement wins.
                if let Some(mut handler) = self.syscall.take() {
                    handler.call(self, id);
                    if self.syscall.is_none() {
                        self.syscall = Some(handler);
                    }
                }
            }

            Opcode::Ld => {
                self.pc = self.pc.wrapping_add(2);
                self.reg_file[gr] = self.mem[m];
            }
            Opcode::St => {
                self.pc = self.pc.wrapping_add(2);
                self.mem[m] = self.reg_file[gr];
            }
            Opcode::Lea => {
                self.pc = self.pc.wrapping_add(2);
                self.reg_file[gr] = adr;
                self.fr = adr;
            }

            Opcode::Add => {
                self.pc = self.pc.wrapping_add(2);
                let v = self.reg_file[gr].wrapping_add(self.mem[m]);
                self.reg_file[gr] = v;
                self.fr = v;
            }
            Opcode::Sub => {
                self.pc = self.pc.wrapping_add(2);
                let v = self.reg_file[gr].wrapping_sub(self.mem[m]);
                self.reg_file[gr] = v;
                self.fr = v;
            }
            Opcode::Mul => {
                self.pc = self.pc.wrapping_add(2);
                let v = self.reg_file[gr].wrapping_mul(self.mem[m]);
                self.reg_file[gr] = v;
                self.fr = v;
            }
            Opcode::Div => {
                self.pc = self.pc.wrapping_add(2);
                let v = self.reg_file[gr].wrapping_div(self.mem[m]);
                self.reg_file[gr] = v;
                self.fr = v;
            }
            Opcode::Mod => {
                self.pc = self.pc.wrapping_add(2);
                let v = self.reg_file[gr].wrapping_rem(self.mem[m]);
                self.reg_file[gr] = v;
                self.fr = v;
            }

            Opcode::And => {
                self.pc = self.pc.wrapping_add(2);
                let v = self.reg_file[gr] & self.mem[m];
                self.reg_file[gr] = v;
                self.fr = v;
            }
            Opcode::Or => {
                self.pc = self.pc.wrapping_add(2);
                let v = self.reg_file[gr] | self.mem[m];
                self.reg_file[gr] = v;
                self.fr = v;
            }
            Opcode::Eor => {
                self.pc = self.pc.wrapping_add(2);
                let v = self.reg_file[gr] ^ self.mem[m];
                self.reg_file[gr] = v;
                self.fr = v;
            }

            // The shift count is the memory word reinterpreted as u16.
            // Counts of 16 or more shift every bit out: zero for all but
            // SRA, which fills with the sign.
            Opcode::Sla => {
                self.pc = self.pc.wrapping_add(2);
                let sh = self.mem[m] as u16;
                let v = match sh {
                    0..=15 => ((self.reg_file[gr] as u16) << sh) as i16,
                    _ => 0,
                };
                self.reg_file[gr] = v;
                self.fr = v;
            }
            Opcode::Sra => {
                self.pc = self.pc.wrapping_add(2);
                let sh = (self.mem[m] as u16).min(15);
                let v = self.reg_file[gr] >> sh;
                self.reg_file[gr] = v;
                self.fr = v;
            }
            Opcode::Sll => {
                self.pc = self.pc.wrapping_add(2);
                let sh = self.mem[m] as u16;
                let v = match sh {
                    0..=15 => ((self.reg_file[gr] as u16) << sh) as i16,
                    _ => 0,
                };
                self.reg_file[gr] = v;
                self.fr = v;
            }
            Opcode::Srl => {
                self.pc = self.pc.wrapping_add(2);
                let sh = self.mem[m] as u16;
                let v = match sh {
                    0..=15 => ((self.reg_file[gr] as u16) >> sh) as i16,
                    _ => 0,
                };
                self.reg_file[gr] = v;
                self.fr = v;
            }

            Opcode::Cpa => {
                self.pc = self.pc.wrapping_add(2);
                self.fr = self.reg_file[gr].wrapping_sub(self.mem[m]);
            }
            Opcode::Cpl => {
                self.pc = self.pc.wrapping_add(2);
                self.fr = ((self.reg_file[gr] as u16).wrapping_sub(self.mem[m] as u16)) as i16;
            }

            Opcode::Jmp => {
                self.pc = m;
            }
            Opcode::Jpz => {
                self.pc = self.pc.wrapping_add(2);
                if self.fr >= 0 {
                    self.pc = m;
                }
            }
            Opcode::Jmi => {
                self.pc = self.pc.wrapping_add(2);
                if self.fr < 0 {
                    self.pc = m;
                }
            }
            Opcode::Jnz => {
                self.pc = self.pc.wrapping_add(2);
                if self.fr != 0 {
                    self.pc = m;
                }
            }
            Opcode::Jze => {
                self.pc = self.pc.wrapping_add(2);
                if self.fr == 0 {
                    self.pc = m;
                }
            }

            Opcode::Push => {
                self.pc = self.pc.wrapping_add(2);
                let sp = self.reg_file[SP];
                self.mem[(sp as u16).wrapping_sub(1)] = self.mem[m];
                self.reg_file[SP] = sp.wrapping_sub(1);
            }
            Opcode::Pop => {
                self.pc = self.pc.wrapping_add(1);
                let sp = self.reg_file[SP];
                self.reg_file[gr] = self.mem[sp as u16];
                self.reg_file[SP] = sp.wrapping_add(1);
            }
            Opcode::Call => {
                self.pc = self.pc.wrapping_add(2);
                let sp = self.reg_file[SP];
                self.mem[(sp as u16).wrapping_sub(1)] = self.pc as i16;
                self.pc = self.mem[m] as u16;
                self.reg_file[SP] = sp.wrapping_sub(1);
            }
            Opcode::Ret => {
                let sp = self.reg_file[SP];
                self.pc = self.mem[sp as u16] as u16;
                self.reg_file[SP] = sp.wrapping_add(1);
            }
        }

        Ok(())
    }

    /// Executes the machine until it halts.
    ///
    /// If a fault occurs, its diagnostic is printed to the process's
    /// standard output and the machine stops (the fault also sets the
    /// halted flag).
    pub fn run(&mut self) {
        while !self.halted {
            if let Err(e) = self.step() {
                println!("{e}");
            }
        }
    }

    /// Executes the machine until it halts or `max_steps` instructions
    /// have been executed, returning the number of instructions executed.
    ///
    /// Fault diagnostics are printed as in [`Machine::run`].
    pub fn run_with_limit(&mut self, max_steps: u64) -> u64 {
        let mut steps = 0;
        while !self.halted && steps < max_steps {
            steps += 1;
            if let Err(e) = self.step() {
                println!("{e}");
            }
        }
        steps
    }

    /// Renders `count` instructions of memory starting at `start` as text,
    /// one line per instruction, without mutating any state.
    ///
    /// Operands are printed in hex; there are no mnemonics, since the
    /// opcode's position in memory already identifies it to an operator
    /// following a listing. Line format by opcode class:
    ///
    /// - SYSCALL: `syscall <id>`
    /// - HALT and RET: an empty line
    /// - POP: `GR<gr>`
    /// - register-operand class (opcodes below CPL): `GR<gr>, <adr>[, GR<xr>]`
    /// - address class (the rest): `<adr>[, GR<xr>]`
    ///
    /// An opcode byte above the highest defined opcode, or a `gr` field
    /// outside of `[0, 4]`, renders as an `unknown` marker and stops the
    /// listing, since instruction boundaries past that word cannot be
    /// trusted.
    pub fn disasm(&self, start: u16, count: u32) -> String {
        let mut buf = String::new();
        let mut pc = start;

        for _ in 0..count {
            let word = self.mem[pc] as u16;
            let (op, gr, xr) = split_word(word);
            let adr = self.mem[pc.wrapping_add(1)];

            if op > Opcode::MAX || gr > 4 {
                let _ = writeln!(buf, "mem[{pc:<4x}]: unknown");
                break;
            }

            if op == Opcode::Syscall as u8 {
                let _ = writeln!(buf, "syscall {}", word & 0xFF);
                pc = pc.wrapping_add(1);
            } else if op == Opcode::Halt as u8 || op == Opcode::Ret as u8 {
                buf.push('\n');
                pc = pc.wrapping_add(1);
            } else if op == Opcode::Pop as u8 {
                let _ = writeln!(buf, "GR{gr}");
                pc = pc.wrapping_add(1);
            } else if op < Opcode::Cpl as u8 {
                let _ = write!(buf, "GR{gr}, {adr:x}");
                if xr != 0 {
                    let _ = write!(buf, ", GR{xr}");
                }
                buf.push('\n');
                pc = pc.wrapping_add(2);
            } else {
                let _ = write!(buf, "{adr:x}");
                if xr != 0 {
                    let _ = write!(buf, ", GR{xr}");
                }
                buf.push('\n');
                pc = pc.wrapping_add(2);
            }
        }

        buf
    }
}

impl std::fmt::Debug for Machine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Machine")
            .field("pc", &self.pc)
            .field("fr", &self.fr)
            .field("reg_file", &self.reg_file)
            .field("halted", &self.halted)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod test {
    use super::io::EmptyIO;
    use super::*;
    use crate::isa::reg_consts::*;

    fn machine(prog: &[i16]) -> Machine {
        Machine::with_io(EmptyIO, prog, 0)
    }

    #[test]
    fn ld_loads_without_touching_fr() {
        let mut vm = machine(&[0x1010, 0x0005, 0x0000, 0, 0, 42]);
        vm.fr = -77;

        vm.step().unwrap();
        assert_eq!(vm.reg_file[GR1], 42);
        assert_eq!(vm.pc, 2);
        assert_eq!(vm.fr, -77);
        assert!(!vm.halted);
    }

    #[test]
    fn halt_stops_after_advancing_pc() {
        let mut vm = machine(&[0x0000]);
        vm.step().unwrap();
        assert!(vm.halted);
        assert_eq!(vm.pc, 1);

        // stepping a halted machine is a no-op
        vm.step().unwrap();
        assert_eq!(vm.pc, 1);
    }

    #[test]
    fn undefined_opcode_faults_without_side_effects() {
        let mut vm = machine(&[0x0200, 0x1234]);
        vm.reg_file[GR3] = 9;

        let err = vm.step().unwrap_err();
        assert_eq!(err, SimErr::IllegalInstr { addr: 0, word: 0x0200 });
        assert!(vm.halted);
        assert_eq!(vm.pc, 0);
        assert_eq!(vm.reg_file[GR3], 9);
    }

    #[test]
    fn bad_register_fields_fault() {
        // gr = 5
        let mut vm = machine(&[Opcode::Ld.word(5, 0), 0]);
        assert!(vm.step().is_err());
        assert!(vm.halted);
        assert_eq!(vm.pc, 0);

        // xr = 7
        let mut vm = machine(&[Opcode::Ld.word(1, 7), 0]);
        assert!(vm.step().is_err());
        assert!(vm.halted);
    }

    #[test]
    fn indexing_applies_before_register_mutation() {
        // LD GR1, [4 + GR1], with GR1 = 1 pointing the load at Mem[5]
        let mut vm = machine(&[Opcode::Ld.word(1, 1), 0x0004, 0, 0, 0, 33]);
        vm.reg_file[GR1] = 1;

        vm.step().unwrap();
        assert_eq!(vm.reg_file[GR1], 33);
    }

    #[test]
    fn arithmetic_updates_fr_and_wraps() {
        let mut vm = machine(&[
            Opcode::Add.word(0, 0), 6,
            Opcode::Sub.word(1, 0), 7,
            Opcode::Mul.word(2, 0), 8,
            6, 5, 2, // operands at 6, 7, 8
        ]);
        vm.reg_file[GR0] = i16::MAX;
        vm.reg_file[GR1] = 3;
        vm.reg_file[GR2] = i16::MIN;

        vm.step().unwrap(); // ADD overflows
        assert_eq!(vm.reg_file[GR0], i16::MAX.wrapping_add(6));
        assert_eq!(vm.fr, vm.reg_file[GR0]);

        vm.step().unwrap();
        assert_eq!(vm.reg_file[GR1], -2);
        assert_eq!(vm.fr, -2);

        vm.step().unwrap(); // MUL overflows
        assert_eq!(vm.reg_file[GR2], i16::MIN.wrapping_mul(2));
        assert_eq!(vm.fr, vm.reg_file[GR2]);
    }

    #[test]
    fn div_and_mod_by_zero_fault_before_any_side_effect() {
        let mut vm = machine(&[Opcode::Div.word(0, 0), 2, 0]);
        vm.reg_file[GR0] = 10;
        vm.fr = 5;

        let err = vm.step().unwrap_err();
        assert!(matches!(err, SimErr::DivideByZero { addr: 0, .. }));
        assert!(vm.halted);
        assert_eq!(vm.pc, 0);
        assert_eq!(vm.reg_file[GR0], 10);
        assert_eq!(vm.fr, 5);

        let mut vm = machine(&[Opcode::Mod.word(0, 0), 2, 0]);
        assert!(vm.step().is_err());
    }

    #[test]
    fn div_of_min_by_minus_one_wraps() {
        let mut vm = machine(&[Opcode::Div.word(0, 0), 2, -1]);
        vm.reg_file[GR0] = i16::MIN;

        vm.step().unwrap();
        assert_eq!(vm.reg_file[GR0], i16::MIN);
        assert_eq!(vm.fr, i16::MIN);
    }

    #[test]
    fn logical_ops_update_fr() {
        let mut vm = machine(&[Opcode::Eor.word(0, 0), 2, 0b1010]);
        vm.reg_file[GR0] = 0b0110;

        vm.step().unwrap();
        assert_eq!(vm.reg_file[GR0], 0b1100);
        assert_eq!(vm.fr, 0b1100);
    }

    #[test]
    fn shifts_reinterpret_count_and_saturate_past_15() {
        // SRA keeps the sign, even when every magnitude bit is shifted out
        let mut vm = machine(&[Opcode::Sra.word(0, 0), 2, 16]);
        vm.reg_file[GR0] = -8;
        vm.step().unwrap();
        assert_eq!(vm.reg_file[GR0], -1);
        assert_eq!(vm.fr, -1);

        // SRL shifts the bit pattern, dropping the sign
        let mut vm = machine(&[Opcode::Srl.word(0, 0), 2, 1]);
        vm.reg_file[GR0] = i16::MIN;
        vm.step().unwrap();
        assert_eq!(vm.reg_file[GR0], 0x4000);

        // count >= 16 clears the register for the logical shifts
        let mut vm = machine(&[Opcode::Sll.word(0, 0), 2, 16]);
        vm.reg_file[GR0] = 0x1234;
        vm.step().unwrap();
        assert_eq!(vm.reg_file[GR0], 0);
        assert_eq!(vm.fr, 0);
    }

    #[test]
    fn compares_set_fr_without_touching_registers() {
        let mut vm = machine(&[Opcode::Cpa.word(0, 0), 2, 5]);
        vm.reg_file[GR0] = 3;
        vm.step().unwrap();
        assert_eq!(vm.fr, -2);
        assert_eq!(vm.reg_file[GR0], 3);

        // compare-logical works over the bit patterns
        let mut vm = machine(&[Opcode::Cpl.word(0, 0), 2, 1]);
        vm.reg_file[GR0] = -1; // 0xFFFF unsigned
        vm.step().unwrap();
        assert_eq!(vm.fr, ((0xFFFFu16).wrapping_sub(1)) as i16);
    }

    #[test]
    fn jumps_condition_on_fr() {
        // JZE taken
        let mut vm = machine(&[Opcode::Jze.word(0, 0), 0x30]);
        vm.step().unwrap();
        assert_eq!(vm.pc, 0x30);

        // JZE not taken: PC falls through to the next instruction
        let mut vm = machine(&[Opcode::Jze.word(0, 0), 0x30]);
        vm.fr = 1;
        vm.step().unwrap();
        assert_eq!(vm.pc, 2);

        // JMP ignores FR
        let mut vm = machine(&[Opcode::Jmp.word(0, 0), 0x42]);
        vm.fr = -1;
        vm.step().unwrap();
        assert_eq!(vm.pc, 0x42);

        // jump targets can be indexed
        let mut vm = machine(&[Opcode::Jmp.word(0, 2), 0x40]);
        vm.reg_file[GR2] = 2;
        vm.step().unwrap();
        assert_eq!(vm.pc, 0x42);
    }

    #[test]
    fn push_writes_below_sp() {
        let mut vm = machine(&[Opcode::Push.word(0, 0), 2, 7]);
        vm.reg_file[SP] = SP_START as i16;

        vm.step().unwrap();
        assert_eq!(vm.mem[0xFBFF], 7);
        assert_eq!(vm.reg_file[SP] as u16, 0xFBFF);
    }

    #[test]
    fn push_pop_round_trip() {
        let mut vm = machine(&[
            Opcode::Push.word(0, 0), 3,
            Opcode::Pop.word(2, 0),
            99,
        ]);
        vm.reg_file[SP] = SP_START as i16;

        vm.step().unwrap();
        vm.step().unwrap();
        assert_eq!(vm.reg_file[GR2], 99);
        assert_eq!(vm.reg_file[SP] as u16, SP_START);
    }

    #[test]
    fn call_ret_round_trip() {
        // CALL [4]; HALT; 0x10 at 4; subroutine at 0x10 is just RET
        let mut vm = machine(&[Opcode::Call.word(0, 0), 4, Opcode::Halt.word(0, 0), 0, 0x10]);
        vm.mem[0x10] = Opcode::Ret.word(0, 0);
        vm.reg_file[SP] = SP_START as i16;

        vm.step().unwrap();
        assert_eq!(vm.pc, 0x10);
        assert_eq!(vm.mem[0xFBFF], 2); // return address

        vm.step().unwrap();
        assert_eq!(vm.pc, 2);
        assert_eq!(vm.reg_file[SP] as u16, SP_START);

        vm.step().unwrap();
        assert!(vm.halted);
    }

    #[test]
    fn non_fr_instructions_leave_fr_alone() {
        let mut vm = machine(&[
            Opcode::St.word(0, 0), 0x20,
            Opcode::Push.word(0, 0), 0x20,
            Opcode::Pop.word(0, 0),
            Opcode::Jmp.word(0, 0), 7,
            Opcode::Halt.word(0, 0),
        ]);
        vm.reg_file[SP] = SP_START as i16;
        vm.fr = -3;

        vm.run();
        assert!(vm.halted);
        assert_eq!(vm.fr, -3);
    }

    #[test]
    fn syscall_invokes_handler_with_advanced_pc() {
        // id 0x23: both nibbles of the id double as the gr/xr fields, so
        // they must stay in range like any other instruction's
        let mut vm = machine(&[Opcode::Syscall.word(2, 3), Opcode::Halt.word(0, 0)]);
        vm.set_syscall_handler(|vm: &mut Machine, id: u8| {
            vm.reg_file[GR0] = i16::from(id);
            vm.reg_file[GR1] = vm.pc as i16;
        });

        vm.step().unwrap();
        assert_eq!(vm.reg_file[GR0], 0x23);
        assert_eq!(vm.reg_file[GR1], 1); // handler sees PC past the trap
        assert!(!vm.halted);

        // without a handler it is a no-op
        vm.clear_syscall_handler();
        vm.pc = 0;
        vm.step().unwrap();
        assert_eq!(vm.pc, 1);
    }

    #[test]
    fn run_with_limit_stops_runaway_programs() {
        // JMP 0: spins forever
        let mut vm = machine(&[Opcode::Jmp.word(0, 0), 0]);
        let steps = vm.run_with_limit(100);
        assert_eq!(steps, 100);
        assert!(!vm.halted);
    }

    #[test]
    fn snapshot_restore_round_trip() {
        let mut vm = machine(&[Opcode::Add.word(0, 0), 2, 5, Opcode::Halt.word(0, 0)]);
        let snap = vm.snapshot();

        vm.run();
        assert!(vm.halted);
        assert_eq!(vm.reg_file[GR0], 5);

        vm.restore(&snap);
        assert!(!vm.halted);
        assert_eq!(vm.pc, 0);
        assert_eq!(vm.reg_file[GR0], 0);
        assert_eq!(vm.mem[0], Opcode::Add.word(0, 0));
    }

    #[test]
    fn disasm_register_class() {
        let vm = machine(&[Opcode::Ld.word(1, 0), 0x1F, Opcode::Add.word(2, 3), 0x40]);
        assert_eq!(vm.disasm(0, 2), "GR1, 1f\nGR2, 40, GR3\n");
    }

    #[test]
    fn disasm_address_class_and_one_word_forms() {
        let mut vm = machine(&[
            Opcode::Jmp.word(0, 1), 0x100,
            Opcode::Syscall.word(0, 0) | 0x05,
            Opcode::Pop.word(3, 0),
            Opcode::Ret.word(0, 0),
        ]);
        assert_eq!(vm.disasm(0, 4), "100, GR1\nsyscall 5\nGR3\n\n");

        // HALT and RET render as empty lines regardless of the low bits
        vm.mem[0x20] = Opcode::Halt.word(3, 2);
        vm.mem[0x21] = Opcode::Ret.word(1, 4);
        assert_eq!(vm.disasm(0x20, 2), "\n\n");
    }

    #[test]
    fn disasm_stops_at_unknown() {
        let mut vm = machine(&[Opcode::Ld.word(1, 0), 5]);
        vm.mem[2] = 0x7F00; // above the highest defined opcode
        vm.mem[3] = Opcode::Halt.word(0, 0);

        assert_eq!(vm.disasm(0, 4), "GR1, 5\nmem[2   ]: unknown\n");

        // bad gr field stops the listing too
        let vm = machine(&[Opcode::Ld.word(9, 0), 5]);
        assert_eq!(vm.disasm(0, 1), "mem[0   ]: unknown\n");
    }

    #[test]
    fn disasm_does_not_mutate() {
        let vm = machine(&[Opcode::Ld.word(1, 0), 5, Opcode::Halt.word(0, 0)]);
        let before = vm.pc;
        let _ = vm.disasm(0, 3);
        assert_eq!(vm.pc, before);
        assert_eq!(vm.mem[0], Opcode::Ld.word(1, 0));
    }
}
