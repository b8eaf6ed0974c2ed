mod clock;
pub mod constants;
mod cpu;
mod error;
mod instr;
mod jit;
mod vm;

pub use self::clock::{Clock, Hz};

pub mod prelude {
    pub use super::{
        cpu::{Chip8Cpu, Quirks},
        error::{Chip8Error, Chip8Result},
        instr::{decode, operand, Effect, Instruction, Op},
        jit::{CompiledBlock, Recompiler},
        vm::{Chip8Conf, Chip8Vm},
    };
}
