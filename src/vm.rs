//! Virtual machine.
use std::fmt::{self, Write};

use log::trace;
use rand::{rngs::SmallRng, SeedableRng};

use crate::{
    clock::{Clock, Hz},
    constants::*,
    cpu::{Chip8Cpu, Quirks},
    error::{Chip8Error, Chip8Result},
    instr::{decode, operand},
    jit::Recompiler,
};

/// VM Configuration Parameters.
#[derive(Debug, Clone)]
pub struct Chip8Conf {
    /// Route control-flow changes through the block recompiler.
    pub jit_enabled: bool,
    /// Instruction budget used when translating a block.
    pub jit_block_size: usize,
    /// Seed for the machine's random number generator. `None` seeds from
    /// the operating system.
    pub rng_seed: Option<u64>,
    pub quirks: Quirks,
}

impl Default for Chip8Conf {
    fn default() -> Self {
        Self {
            jit_enabled: false,
            jit_block_size: JIT_BLOCK_SIZE,
            rng_seed: None,
            quirks: Quirks::default(),
        }
    }
}

/// A single CHIP-8 machine: state, interpreter and block recompiler.
///
/// The machine is single threaded; nothing in here locks. Timer ticking
/// only touches the delay-timer byte and may be driven from a host timer,
/// provided the host serializes it with instruction execution. The
/// framebuffer plus dirty flag are published without synchronization, so a
/// presentation thread reading them concurrently sees eventually-consistent
/// frames unless the host adds its own handoff.
pub struct Chip8Vm {
    cpu: Chip8Cpu,
    jit: Recompiler,
    timer: Clock,
    conf: Chip8Conf,
}

impl Chip8Vm {
    pub fn new(conf: Chip8Conf) -> Self {
        let rng = match conf.rng_seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => SmallRng::from_entropy(),
        };

        Chip8Vm {
            cpu: Chip8Cpu::with_parts(conf.quirks, rng),
            jit: Recompiler::new(),
            timer: Clock::from_hz(Hz(DELAY_FREQUENCY)),
            conf,
        }
    }

    /// Configuration that was used to instantiate the VM.
    pub fn config(&self) -> &Chip8Conf {
        &self.conf
    }

    /// Load a ROM image into memory at the fixed program start.
    ///
    /// Memory is wiped first, the builtin font is re-seeded, the program
    /// counter is reset to the entry point and the block cache is dropped.
    pub fn load_rom(&mut self, rom: &[u8]) -> Chip8Result<()> {
        if rom.len() > MEM_SIZE - MEM_START {
            return Err(Chip8Error::LargeProgram);
        }

        // Start with clean memory to avoid leaking the previous program.
        self.cpu.clear_memory();
        self.load_font(&FONTSET)?;

        self.cpu.ram[MEM_START..MEM_START + rom.len()].copy_from_slice(rom);

        self.reset();

        Ok(())
    }

    /// Copy a fontset into the reserved font region.
    pub fn load_font(&mut self, fontset: &[u8]) -> Chip8Result<()> {
        if fontset.len() != FONTSET_DATA_LENGTH {
            return Err(Chip8Error::Font);
        }

        self.cpu.ram[FONTSET_START..FONTSET_START + FONTSET_DATA_LENGTH].copy_from_slice(fontset);

        Ok(())
    }

    /// Clear execution state in preparation for a fresh startup. The
    /// translated blocks belong to the previous memory contents and must go.
    fn reset(&mut self) {
        self.cpu.pc = MEM_START as Address;
        self.cpu.sp = 0;
        self.cpu.registers.fill(0);
        self.cpu.index = 0;
        self.cpu.delay_timer = 0;
        self.cpu.sound_timer = 0;
        self.cpu.vram_dirty = false;
        self.jit.clear();
        self.timer.reset();
    }
}

/// Interpreter
impl Chip8Vm {
    /// Execute a single fetch-decode-execute cycle.
    ///
    /// The instruction word is fetched big-endian from the current program
    /// counter and its effect invoked with the extracted operand. Unless
    /// the descriptor manages the program counter itself, PC advances by 2.
    /// With the recompiler enabled, a PC-managing instruction hands the new
    /// PC to [`Chip8Vm::run_branch`].
    pub fn step(&mut self) -> Chip8Result<()> {
        let word = self.cpu.fetch()?;
        let instr = decode(word)?;
        let arg = operand(word, instr.operand_bits);

        trace!("{:04X}: {} {:03X}", self.cpu.pc, instr.name, arg);

        (instr.effect)(&mut self.cpu, arg)?;

        if !instr.manages_pc {
            self.cpu.pc += 2;
        } else if self.conf.jit_enabled {
            self.run_branch(self.cpu.pc)?;
        }

        Ok(())
    }

    /// Pure repetition of [`Chip8Vm::step`]. No batching happens at this
    /// layer; how large `n` is and how often this runs is the host's
    /// turbo/real-time policy.
    pub fn run_steps(&mut self, step_count: usize) -> Chip8Result<()> {
        for _ in 0..step_count {
            self.step()?;
        }
        Ok(())
    }

    /// Execute the compiled block at `pc`, translating it first on a cache
    /// miss. The block runs until its budget is exhausted or control
    /// diverges from the translated path; either way the caller re-enters
    /// the dispatcher afterward.
    pub fn run_branch(&mut self, pc: Address) -> Chip8Result<()> {
        let block = self
            .jit
            .get_or_create(&self.cpu, pc, self.conf.jit_block_size);
        block.run(&mut self.cpu)
    }

    /// Count down the delay timer by one if it is nonzero.
    ///
    /// Must be invoked at a fixed real-time cadence (60 Hz), independent of
    /// how many instructions execute between calls.
    pub fn tick(&mut self) {
        self.cpu.tick_delay();
    }

    /// Convenience for hosts polling from a frame loop: applies
    /// [`Chip8Vm::tick`] whenever the 60 Hz interval has elapsed.
    pub fn update_timers(&mut self) {
        if self.timer.tick() {
            self.tick();
        }
    }
}

/// State access for hosts, presentation adapters and tests.
impl Chip8Vm {
    pub fn cpu(&self) -> &Chip8Cpu {
        &self.cpu
    }

    pub fn pc(&self) -> Address {
        self.cpu.pc
    }

    pub fn index(&self) -> Address {
        self.cpu.index
    }

    pub fn registers(&self) -> &[u8; REGISTER_COUNT] {
        &self.cpu.registers
    }

    pub fn delay_timer(&self) -> u8 {
        self.cpu.delay_timer
    }

    /// The packed 64x32 monochrome framebuffer, 8 pixels per byte,
    /// most-significant bit leftmost.
    pub fn framebuffer(&self) -> &[u8; DISPLAY_BUFFER_SIZE] {
        &self.cpu.vram
    }

    /// Pixels changed since the last [`Chip8Vm::clear_dirty`].
    pub fn is_dirty(&self) -> bool {
        self.cpu.vram_dirty
    }

    /// Acknowledge a consumed frame. Only the presentation side should
    /// call this.
    pub fn clear_dirty(&mut self) {
        self.cpu.vram_dirty = false;
    }

    /// Number of blocks held by the recompiler cache.
    pub fn cached_blocks(&self) -> usize {
        self.jit.len()
    }
}

/// Troubleshooting
#[allow(dead_code)]
#[doc(hidden)]
impl Chip8Vm {
    /// Returns a memory range as a human readable string of instruction
    /// words.
    pub fn dump_ram(&self, start: usize, count: usize) -> Result<String, fmt::Error> {
        let mut buf = String::new();

        for at in (start..(start + count).min(MEM_SIZE - 1)).step_by(2) {
            writeln!(
                buf,
                "{:04X}: {:02X}{:02X}",
                at,
                self.cpu.ram[at],
                self.cpu.ram[at + 1]
            )?;
        }

        Ok(buf)
    }

    pub fn dump_display(&self) -> Result<String, fmt::Error> {
        let mut buf = String::new();

        for y in 0..DISPLAY_HEIGHT {
            for x in 0..DISPLAY_WIDTH {
                if self.cpu.pixel(x, y) {
                    write!(buf, "#")?;
                } else {
                    write!(buf, ".")?;
                }
            }
            writeln!(buf)?;
        }

        Ok(buf)
    }
}
