//! Result and errors.
use std::fmt::{self, Display, Formatter};

pub type Chip8Result<T> = std::result::Result<T, Chip8Error>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Chip8Error {
    /// Raw instruction word matches no known opcode pattern.
    Decode { word: u16 },
    /// Program counter is odd or outside of addressable memory.
    PcFault { pc: u16 },
    /// `CALL` with a full call stack.
    StackOverflow,
    /// `RET` with an empty call stack.
    StackUnderflow,
    /// Attempt to load a ROM that can't fit in memory.
    LargeProgram,
    /// Fontset data does not fit the reserved font region.
    Font,
}

impl Display for Chip8Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Decode { word } => write!(f, "unknown instruction: {word:04X}"),
            Self::PcFault { pc } => {
                write!(f, "program counter out of range or misaligned: {pc:04X}")
            }
            Self::StackOverflow => write!(f, "call stack overflow"),
            Self::StackUnderflow => write!(f, "call stack underflow"),
            Self::LargeProgram => write!(f, "program too large for VM memory"),
            Self::Font => write!(f, "fontset data must fit the reserved font region"),
        }
    }
}

impl std::error::Error for Chip8Error {}
