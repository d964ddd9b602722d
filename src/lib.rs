//! A simulator for a COMET-style 16-bit virtual machine.
//!
//! The machine has 65536 words of signed 16-bit memory, five general
//! registers (the last doubling as the stack pointer), a flag register
//! driving conditional jumps, and a 28-opcode instruction set with indexed
//! addressing, a software stack, and a SYSCALL trap into the host.
//!
//! This crate simulates programs for that machine and ships an interactive
//! debugger for stepping through them:
//! - [`isa`]: the instruction set (registers, opcodes, word layout)
//! - [`sim`]: the executing machine, its memory and console devices, the
//!   disassembler, and the debugger
//!
//! Programs arrive as a word image from an external assembler or loader:
//!
//! ```
//! use comet16::isa::Opcode;
//! use comet16::isa::reg_consts::GR1;
//! use comet16::sim::Machine;
//!
//! // LD GR1, [5]; HALT; with 42 stored at address 5
//! let prog = [
//!     Opcode::Ld.word(1, 0), 0x0005,
//!     Opcode::Halt.word(0, 0),
//!     0, 0, 42,
//! ];
//!
//! let mut vm = Machine::new(&prog, 0);
//! vm.run();
//!
//! assert!(vm.halted);
//! assert_eq!(vm.reg_file[GR1], 42);
//! ```
//!
//! To debug interactively instead of running to halt, wrap the machine in
//! a [`sim::debug::Debugger`].
#![warn(missing_docs)]

pub mod isa;
pub mod sim;
