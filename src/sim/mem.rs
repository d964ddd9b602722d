//! Memory handling for the machine.
//!
//! This module consists of:
//! - [`MemArray`]: the machine's word memory.
//! - [`RegFile`]: the general register file.
//!
//! Every cell is a signed 16-bit word. Operations that need the unsigned
//! view of a word (compare-logical, the logical shifts) reinterpret the bit
//! pattern at the point of use; the storage itself is always `i16`.

use std::ops::{Index, IndexMut};

use crate::isa::Reg;

/// The number of words in the machine's memory.
pub const MEM_SIZE: usize = 1 << 16;

/// The machine's memory: a flat array of [`MEM_SIZE`] signed 16-bit words.
///
/// This is the sole addressable storage for code, data, and the stack.
/// It can be addressed with any `u16`, so every access is in bounds.
///
/// ```
/// use comet16::sim::mem::MemArray;
///
/// let mut mem = MemArray::new();
/// mem[0x3000] = 11;
/// assert_eq!(mem[0x3000], 11);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemArray(Box<[i16; MEM_SIZE]>);

impl MemArray {
    /// Creates a new, zero-filled memory.
    ///
    /// Note that the array is held in the heap, as it is too large for the stack.
    pub fn new() -> Self {
        let data = vec![0i16; MEM_SIZE]
            .into_boxed_slice()
            .try_into()
            .unwrap_or_else(|_| unreachable!("vec should have had {MEM_SIZE} elements"));
        Self(data)
    }

    /// Copies a program image into the start of memory.
    ///
    /// Images longer than the memory are truncated to fit.
    pub fn load(&mut self, prog: &[i16]) {
        let n = prog.len().min(MEM_SIZE);
        self.0[..n].copy_from_slice(&prog[..n]);
    }

    /// Views the whole memory as a slice.
    pub fn as_slice(&self) -> &[i16] {
        &self.0[..]
    }
}
impl Default for MemArray {
    fn default() -> Self {
        Self::new()
    }
}
impl Index<u16> for MemArray {
    type Output = i16;

    fn index(&self, addr: u16) -> &Self::Output {
        &self.0[usize::from(addr)]
    }
}
impl IndexMut<u16> for MemArray {
    fn index_mut(&mut self, addr: u16) -> &mut Self::Output {
        &mut self.0[usize::from(addr)]
    }
}

/// The register file: five word-sized general registers.
///
/// This struct is indexed with a [`Reg`]
/// (which can be selected from [`crate::isa::reg_consts`] or constructed via [`Reg::try_from`]).
///
/// # Example
///
/// ```
/// use comet16::sim::mem::RegFile;
/// use comet16::isa::reg_consts::GR0;
///
/// let mut reg = RegFile::default();
/// reg[GR0] = 11;
/// assert_eq!(reg[GR0], 11);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RegFile([i16; 5]);

impl Index<Reg> for RegFile {
    type Output = i16;

    fn index(&self, index: Reg) -> &Self::Output {
        &self.0[usize::from(index)]
    }
}
impl IndexMut<Reg> for RegFile {
    fn index_mut(&mut self, index: Reg) -> &mut Self::Output {
        &mut self.0[usize::from(index)]
    }
}
