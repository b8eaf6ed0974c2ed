//! CPU and memory state.
use rand::{rngs::SmallRng, SeedableRng};

use crate::{
    constants::*,
    error::{Chip8Error, Chip8Result},
};

/// Behaviour toggles for instructions that historically had two variants.
///
/// Both default to off, matching the most common ROM expectations.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Quirks {
    /// `SHR`/`SHL` first copy VY into VX before shifting.
    pub legacy_shift: bool,
    /// `LD [I], Vx` and `LD Vx, [I]` increment I past the transferred range.
    pub legacy_index_increment: bool,
}

/// Core state for a chip8 machine.
///
/// Exactly one live instance exists per emulated machine. The core performs
/// no internal locking; if execution and timer ticking are driven from
/// different threads the host must serialize access itself.
pub struct Chip8Cpu {
    // ------------------------------------------------------------------------
    // Registers
    /// Program counter pointing to the current position in the bytecode.
    /// Always even and inside addressable memory while execution is healthy.
    pub(crate) pc: Address,
    /// Stack pointer, indicating the number of return addresses pushed.
    pub(crate) sp: usize,
    /// General purpose registers for temporary values.
    ///
    /// Register 16 (VF) is used for either the carry flag or borrow switch
    /// depending on opcode, and as the collision flag when drawing.
    pub(crate) registers: [u8; REGISTER_COUNT],
    /// Pointer register used for temporarily storing an address. Since
    /// addresses are 12 bits, only the lowest (rightmost) bits are used.
    pub(crate) index: Address,
    /// (DT) Delay timer that counts down to 0 at a fixed real-time rate.
    pub(crate) delay_timer: u8,
    /// (ST) Sound timer slot. Present for completeness; no decoded
    /// instruction writes it.
    pub(crate) sound_timer: u8,

    // ------------------------------------------------------------------------
    // Memory
    /// Main memory storage space.
    pub(crate) ram: Box<[u8; MEM_SIZE]>,
    /// Stack of return pointers used for jumping when a routine call finishes.
    pub(crate) stack: [Address; STACK_SIZE],
    /// Screen buffer that is drawn to. Packed 8 pixels per byte, row-major,
    /// most-significant bit is the leftmost pixel.
    pub(crate) vram: Box<[u8; DISPLAY_BUFFER_SIZE]>,
    /// Pixels changed since the last time the presentation side consumed
    /// a frame.
    pub(crate) vram_dirty: bool,

    // ------------------------------------------------------------------------
    // Control
    /// Pseudo-random generator for `RND`, seedable for deterministic tests.
    pub(crate) rng: SmallRng,
    pub(crate) quirks: Quirks,
}

impl Default for Chip8Cpu {
    fn default() -> Self {
        Self::with_parts(Quirks::default(), SmallRng::from_entropy())
    }
}

impl Chip8Cpu {
    pub fn new() -> Self {
        Default::default()
    }

    pub(crate) fn with_parts(quirks: Quirks, rng: SmallRng) -> Self {
        Self {
            pc: MEM_START as Address,
            sp: 0,
            registers: [0; REGISTER_COUNT],
            index: 0,
            delay_timer: 0,
            sound_timer: 0,

            ram: Box::new([0; MEM_SIZE]),
            stack: [0; STACK_SIZE],
            vram: Box::new([0; DISPLAY_BUFFER_SIZE]),
            vram_dirty: false,

            rng,
            quirks,
        }
    }

    /// Erase the contents of the memory buffers `ram`, `stack` and `vram`.
    pub(crate) fn clear_memory(&mut self) {
        self.ram.fill(0);
        self.stack.fill(0);
        self.vram.fill(0);
    }

    /// Zero the framebuffer and flag it for presentation.
    pub(crate) fn clear_display(&mut self) {
        self.vram.fill(0);
        self.vram_dirty = true;
    }

    /// Fetch the big-endian 16-bit instruction word at the given address.
    ///
    /// An odd or out-of-range program counter is a fatal fault.
    #[inline]
    pub(crate) fn fetch_at(&self, pc: Address) -> Chip8Result<u16> {
        let at = pc as usize;
        if at % 2 != 0 || at + 1 >= MEM_SIZE {
            return Err(Chip8Error::PcFault { pc });
        }
        Ok(((self.ram[at] as u16) << 8) | self.ram[at + 1] as u16)
    }

    /// Fetch the instruction word at the current program counter.
    #[inline(always)]
    pub(crate) fn fetch(&self) -> Chip8Result<u16> {
        self.fetch_at(self.pc)
    }

    /// Push a return address. The stack holds at most [`STACK_SIZE`] entries.
    #[inline]
    pub(crate) fn push(&mut self, addr: Address) -> Chip8Result<()> {
        if self.sp >= STACK_SIZE {
            return Err(Chip8Error::StackOverflow);
        }
        self.stack[self.sp] = addr;
        self.sp += 1;
        Ok(())
    }

    /// Pop the return address at the top of the stack.
    #[inline]
    pub(crate) fn pop(&mut self) -> Chip8Result<Address> {
        if self.sp == 0 {
            return Err(Chip8Error::StackUnderflow);
        }
        self.sp -= 1;
        Ok(self.stack[self.sp])
    }

    /// Count down the delay timer.
    #[inline]
    pub fn tick_delay(&mut self) {
        // The checked_sub implementation uses `unlikely!()` which degrades performance.
        let (val, underflow) = self.delay_timer.overflowing_sub(1);
        if !underflow {
            self.delay_timer = val;
        }
    }

    /// Read a single pixel out of the packed framebuffer.
    pub fn pixel(&self, x: usize, y: usize) -> bool {
        let byte = self.vram[(x / 8) + y * (DISPLAY_WIDTH / 8)];
        byte & (0x80 >> (x % 8)) != 0
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_fetch_big_endian() {
        let mut cpu = Chip8Cpu::new();
        cpu.ram[MEM_START] = 0x6A;
        cpu.ram[MEM_START + 1] = 0x02;

        assert_eq!(cpu.fetch().unwrap(), 0x6A02);
    }

    #[test]
    fn test_fetch_pc_fault() {
        let mut cpu = Chip8Cpu::new();

        cpu.pc = 0x201;
        assert_eq!(cpu.fetch(), Err(Chip8Error::PcFault { pc: 0x201 }));

        cpu.pc = (MEM_SIZE - 1) as Address;
        assert!(cpu.fetch().is_err());

        cpu.pc = 0x1000;
        assert_eq!(cpu.fetch(), Err(Chip8Error::PcFault { pc: 0x1000 }));
    }

    #[test]
    fn test_stack_bounds() {
        let mut cpu = Chip8Cpu::new();

        assert_eq!(cpu.pop(), Err(Chip8Error::StackUnderflow));

        for i in 0..STACK_SIZE {
            cpu.push(0x200 + i as Address).unwrap();
        }
        assert_eq!(cpu.push(0x300), Err(Chip8Error::StackOverflow));

        assert_eq!(cpu.pop().unwrap(), 0x200 + (STACK_SIZE as Address) - 1);
    }

    #[test]
    fn test_tick_delay_stops_at_zero() {
        let mut cpu = Chip8Cpu::new();
        cpu.delay_timer = 2;

        cpu.tick_delay();
        assert_eq!(cpu.delay_timer, 1);
        cpu.tick_delay();
        assert_eq!(cpu.delay_timer, 0);
        cpu.tick_delay();
        assert_eq!(cpu.delay_timer, 0);
    }

    #[test]
    fn test_pixel_unpacking() {
        let mut cpu = Chip8Cpu::new();
        cpu.vram[0] = 0b1000_0001;
        cpu.vram[8] = 0b0100_0000; // second row

        assert!(cpu.pixel(0, 0));
        assert!(!cpu.pixel(1, 0));
        assert!(cpu.pixel(7, 0));
        assert!(cpu.pixel(1, 1));
        assert!(!cpu.pixel(0, 1));
    }
}
