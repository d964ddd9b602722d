//! Definitions of the machine's instruction set:
//! registers, opcodes, and the instruction word layout.
//!
//! An instruction occupies one or two consecutive memory words.
//! The first word holds the opcode in its high byte and two 4-bit register
//! fields in its low byte; the second word (present for two-word opcodes)
//! holds the address operand:
//!
//! ```text
//!          opcode    gr   xr
//!          |         |    |
//!          VVVV VVVV VVVV VVVV
//! word 0:  0001 0000 0001 0010    (LD GR1, adr, GR2)
//! word 1:  the address operand
//! ```
//!
//! `gr` selects the instruction's general register and `xr` selects the
//! index register: when `xr != 0`, the value of `GR[xr]` is added to the
//! address operand before use. `xr == 0` means "no indexing", not GR0.
//!
//! Field extraction is shared between the execution engine and the
//! disassembler through [`split_word`].

/// A general register. Must be between 0 and 4.
///
/// Register 4 doubles as the stack pointer (see [`reg_consts::SP`]).
///
/// A `Reg` can either be selected from [`reg_consts`] or constructed
/// with [`Reg::try_from`]:
///
/// ```
/// use comet16::isa::Reg;
///
/// assert!(Reg::try_from(3).is_ok());
/// assert!(Reg::try_from(5).is_err());
/// ```
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub struct Reg(pub(crate) u8);

/// Register constants!
pub mod reg_consts {
    use super::Reg;

    /// The 0th general register.
    pub const GR0: Reg = Reg(0);
    /// The 1st general register.
    pub const GR1: Reg = Reg(1);
    /// The 2nd general register.
    pub const GR2: Reg = Reg(2);
    /// The 3rd general register.
    pub const GR3: Reg = Reg(3);
    /// The 4th general register.
    pub const GR4: Reg = Reg(4);
    /// The stack pointer, an alias for [`GR4`].
    pub const SP: Reg = GR4;
}

impl Reg {
    /// Gets the register number of this [`Reg`]. This is always between 0 and 4.
    pub fn reg_no(self) -> u8 {
        self.0
    }
}
impl std::fmt::Display for Reg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "GR{}", self.0)
    }
}
impl From<Reg> for usize {
    // Used for indexing the register file.
    fn from(value: Reg) -> Self {
        usize::from(value.0)
    }
}
impl TryFrom<u8> for Reg {
    type Error = InvalidRegErr;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0..=4 => Ok(Reg(value)),
            _ => Err(InvalidRegErr(value)),
        }
    }
}

/// The error raised when a register field is outside of `[0, 4]`.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub struct InvalidRegErr(pub u8);
impl std::fmt::Display for InvalidRegErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "register field {} is not a register (must be 0-4)", self.0)
    }
}
impl std::error::Error for InvalidRegErr {}

/// An operation of the machine.
///
/// The discriminant of each variant is the opcode byte as it appears
/// in the high byte of an instruction's first word.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
#[repr(u8)]
pub enum Opcode {
    /// Stop the machine.
    Halt = 0x00,
    /// Trap into the host's system-call handler.
    /// The low byte of the instruction word is the call id.
    Syscall = 0x01,
    /// `GR[gr] = Mem[adr]`
    Ld = 0x10,
    /// `Mem[adr] = GR[gr]`
    St = 0x11,
    /// `GR[gr] = adr` (load effective address)
    Lea = 0x12,
    /// `GR[gr] += Mem[adr]`, signed
    Add = 0x20,
    /// `GR[gr] -= Mem[adr]`, signed
    Sub = 0x21,
    /// `GR[gr] *= Mem[adr]`, signed
    Mul = 0x22,
    /// `GR[gr] /= Mem[adr]`, signed
    Div = 0x23,
    /// `GR[gr] %= Mem[adr]`, signed
    Mod = 0x24,
    /// `GR[gr] &= Mem[adr]`
    And = 0x30,
    /// `GR[gr] |= Mem[adr]`
    Or = 0x31,
    /// `GR[gr] ^= Mem[adr]`
    Eor = 0x32,
    /// Arithmetic left shift of `GR[gr]` by `Mem[adr]`.
    Sla = 0x40,
    /// Arithmetic right shift of `GR[gr]` by `Mem[adr]`.
    Sra = 0x41,
    /// Logical left shift of `GR[gr]` by `Mem[adr]`.
    Sll = 0x42,
    /// Logical right shift of `GR[gr]` by `Mem[adr]`.
    Srl = 0x43,
    /// `FR = GR[gr] - Mem[adr]`, signed (compare arithmetic)
    Cpa = 0x50,
    /// `FR = GR[gr] - Mem[adr]` over the unsigned bit patterns (compare logical)
    Cpl = 0x51,
    /// `PC = adr`
    Jmp = 0x60,
    /// `PC = adr` if `FR >= 0`
    Jpz = 0x61,
    /// `PC = adr` if `FR < 0`
    Jmi = 0x62,
    /// `PC = adr` if `FR != 0`
    Jnz = 0x63,
    /// `PC = adr` if `FR == 0`
    Jze = 0x64,
    /// `Mem[GR[4] - 1] = Mem[adr]; GR[4] -= 1`
    Push = 0x70,
    /// `GR[gr] = Mem[GR[4]]; GR[4] += 1`
    Pop = 0x71,
    /// Push the return address and jump to `Mem[adr]`.
    Call = 0x72,
    /// Pop the return address into the PC.
    Ret = 0x73,
}

impl Opcode {
    /// The highest defined opcode byte.
    ///
    /// The disassembler treats anything above this as undecodable.
    pub const MAX: u8 = Opcode::Ret as u8;

    /// Whether an instruction with this opcode occupies two memory words.
    pub fn is_two_words(self) -> bool {
        !matches!(self, Opcode::Halt | Opcode::Syscall | Opcode::Pop | Opcode::Ret)
    }

    /// Builds the first word of an instruction with this opcode.
    ///
    /// Only the low 4 bits of `gr` and `xr` are kept.
    ///
    /// ```
    /// use comet16::isa::Opcode;
    ///
    /// assert_eq!(Opcode::Ld.word(1, 0), 0x1010);
    /// assert_eq!(Opcode::Halt.word(0, 0), 0x0000);
    /// ```
    pub fn word(self, gr: u8, xr: u8) -> i16 {
        let w = ((self as u8 as u16) << 8) | (u16::from(gr & 0xF) << 4) | u16::from(xr & 0xF);
        w as i16
    }
}
impl TryFrom<u8> for Opcode {
    type Error = InvalidOpcodeErr;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        let op = match value {
            0x00 => Opcode::Halt,
            0x01 => Opcode::Syscall,
            0x10 => Opcode::Ld,
            0x11 => Opcode::St,
            0x12 => Opcode::Lea,
            0x20 => Opcode::Add,
            0x21 => Opcode::Sub,
            0x22 => Opcode::Mul,
            0x23 => Opcode::Div,
            0x24 => Opcode::Mod,
            0x30 => Opcode::And,
            0x31 => Opcode::Or,
            0x32 => Opcode::Eor,
            0x40 => Opcode::Sla,
            0x41 => Opcode::Sra,
            0x42 => Opcode::Sll,
            0x43 => Opcode::Srl,
            0x50 => Opcode::Cpa,
            0x51 => Opcode::Cpl,
            0x60 => Opcode::Jmp,
            0x61 => Opcode::Jpz,
            0x62 => Opcode::Jmi,
            0x63 => Opcode::Jnz,
            0x64 => Opcode::Jze,
            0x70 => Opcode::Push,
            0x71 => Opcode::Pop,
            0x72 => Opcode::Call,
            0x73 => Opcode::Ret,
            _ => return Err(InvalidOpcodeErr(value)),
        };
        Ok(op)
    }
}

/// The error raised when an opcode byte does not name a defined operation.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub struct InvalidOpcodeErr(pub u8);
impl std::fmt::Display for InvalidOpcodeErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "byte {:#04x} is not an opcode", self.0)
    }
}
impl std::error::Error for InvalidOpcodeErr {}

/// Splits an instruction's first word into its raw `(opcode, gr, xr)` fields.
///
/// No validation is applied; the fields are returned as extracted from the
/// bit pattern. The engine and the disassembler both decode through this
/// function so their views of memory can never disagree.
pub fn split_word(word: u16) -> (u8, u8, u8) {
    let op = (word >> 8) as u8;
    let gr = ((word >> 4) & 0xF) as u8;
    let xr = (word & 0xF) as u8;
    (op, gr, xr)
}
