//! Basic-block recompiler.
//!
//! Promotes linear instruction runs into cached, directly-callable blocks.
//! A block replays the effects decoded at translation time without returning
//! to the dispatch loop between instructions. Conditional skips and branches
//! inside the block are handled with a divergence check: after the effect
//! runs, the actual program counter is compared against the statically
//! expected fall-through address, and the block returns early when control
//! left the assumed path.
//!
//! The cache is sound only while the translated bytes stay unchanged;
//! self-modifying code is not detected. There is no eviction policy, so the
//! cache grows for the life of the machine.
use std::collections::{hash_map::Entry, HashMap};

use log::debug;

use crate::{
    constants::Address,
    cpu::Chip8Cpu,
    error::Chip8Result,
    instr::{decode, operand, Effect},
};

/// One translated instruction inside a block.
struct BlockStep {
    effect: Effect,
    /// Operand value, already masked to the descriptor's declared width.
    arg: u16,
    /// The address PC would hold had no skip or branch occurred.
    fallthrough: Address,
    /// The instruction manages PC itself and needs the divergence check
    /// when it is not the last step.
    managed: bool,
}

/// A compiled unit for a fixed entry address. Never mutated after creation.
pub struct CompiledBlock {
    entry: Address,
    steps: Vec<BlockStep>,
}

impl CompiledBlock {
    /// Walk forward from `entry` in 2-byte steps, fetching and decoding
    /// exactly as the interpreter would, up to `max_instructions` entries.
    /// A fetch or decode fault ends the walk early; the faulting
    /// instruction is not included.
    fn translate(cpu: &Chip8Cpu, entry: Address, max_instructions: usize) -> Self {
        let mut steps = Vec::with_capacity(max_instructions);
        let mut pc = entry;

        for _ in 0..max_instructions {
            let word = match cpu.fetch_at(pc) {
                Ok(word) => word,
                Err(_) => break,
            };
            let instr = match decode(word) {
                Ok(instr) => instr,
                Err(_) => break,
            };

            steps.push(BlockStep {
                effect: instr.effect,
                arg: operand(word, instr.operand_bits),
                fallthrough: pc + 2,
                managed: instr.manages_pc,
            });
            pc += 2;
        }

        CompiledBlock { entry, steps }
    }

    pub fn entry(&self) -> Address {
        self.entry
    }

    /// Number of instructions translated into this block.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Replay the block's effects against the live machine state.
    ///
    /// Runs until the translated instructions are exhausted or a divergence
    /// return fires. The caller must re-enter the dispatcher afterward; the
    /// block never chains into another one. Effects can fault (call stack
    /// bounds); the fault propagates out.
    pub fn run(&self, cpu: &mut Chip8Cpu) -> Chip8Result<()> {
        let count = self.steps.len();

        for (i, step) in self.steps.iter().enumerate() {
            (step.effect)(cpu, step.arg)?;

            if step.managed {
                // The last instruction owns the final PC unconditionally.
                if i + 1 == count {
                    break;
                }
                if cpu.pc != step.fallthrough {
                    // The skip/branch/call took effect. Control must go back
                    // to the dispatcher to re-decode at the new PC.
                    break;
                }
            } else {
                cpu.pc = step.fallthrough;
            }
        }

        Ok(())
    }
}

/// Per-entry-address block cache: miss translates, hit reuses.
pub struct Recompiler {
    blocks: HashMap<Address, CompiledBlock>,
}

impl Default for Recompiler {
    fn default() -> Self {
        Self::new()
    }
}

impl Recompiler {
    pub fn new() -> Self {
        Self {
            blocks: HashMap::new(),
        }
    }

    /// Look up the block for `pc`, translating and caching it on a miss.
    pub fn get_or_create(
        &mut self,
        cpu: &Chip8Cpu,
        pc: Address,
        max_instructions: usize,
    ) -> &CompiledBlock {
        match self.blocks.entry(pc) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let block = CompiledBlock::translate(cpu, pc, max_instructions);
                debug!(
                    "translated block {:04X} ({} instructions)",
                    pc,
                    block.len()
                );
                entry.insert(block)
            }
        }
    }

    /// Number of cached blocks.
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Drop every cached block. Required when the translated memory region
    /// is replaced, e.g. on ROM load.
    pub fn clear(&mut self) {
        self.blocks.clear();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::constants::*;

    fn cpu_with_program(program: &[u8]) -> Chip8Cpu {
        let mut cpu = Chip8Cpu::new();
        cpu.ram[MEM_START..MEM_START + program.len()].copy_from_slice(program);
        cpu
    }

    #[test]
    fn test_translation_stops_at_decode_fault() {
        // LD V0, 5 / unassigned E-family word / LD V1, 1
        let cpu = cpu_with_program(&[0x60, 0x05, 0xE0, 0x9E, 0x61, 0x01]);
        let block = CompiledBlock::translate(&cpu, 0x200, 10);

        assert_eq!(block.entry(), 0x200);
        assert_eq!(block.len(), 1, "the faulting instruction is excluded");
    }

    #[test]
    fn test_translation_respects_budget() {
        // Zeroed memory decodes as the SYS no-op, so the walk fills up.
        let cpu = cpu_with_program(&[]);
        let block = CompiledBlock::translate(&cpu, 0x200, 7);
        assert_eq!(block.len(), 7);
    }

    #[test]
    fn test_translation_stops_at_memory_end() {
        let cpu = cpu_with_program(&[]);
        let block = CompiledBlock::translate(&cpu, (MEM_SIZE - 4) as Address, 10);
        assert_eq!(block.len(), 2);
    }

    #[test]
    fn test_straight_line_block_advances_pc() {
        let cpu = cpu_with_program(&[0x60, 0x05, 0x70, 0x03]);
        let block = CompiledBlock::translate(&cpu, 0x200, 2);

        let mut cpu = cpu;
        block.run(&mut cpu).unwrap();

        assert_eq!(cpu.registers[0], 8);
        assert_eq!(cpu.pc, 0x204);
    }

    #[test]
    fn test_divergence_returns_early() {
        // SE V0, 5 / LD V1, 1 / LD V2, 2
        let program = [0x30, 0x05, 0x61, 0x01, 0x62, 0x02];

        // Skip taken: PC moves to 0x204, away from the assumed 0x202.
        let mut cpu = cpu_with_program(&program);
        cpu.registers[0] = 5;
        let block = CompiledBlock::translate(&cpu, 0x200, 3);
        block.run(&mut cpu).unwrap();

        assert_eq!(cpu.pc, 0x204);
        assert_eq!(cpu.registers[1], 0, "instructions after the divergence must not run");
        assert_eq!(cpu.registers[2], 0);
    }

    #[test]
    fn test_no_op_branch_continues() {
        // Skip not taken: the divergence check passes and the block keeps going.
        let mut cpu = cpu_with_program(&[0x30, 0x05, 0x61, 0x01, 0x62, 0x02]);
        cpu.registers[0] = 9;
        let block = CompiledBlock::translate(&cpu, 0x200, 3);
        block.run(&mut cpu).unwrap();

        assert_eq!(cpu.registers[1], 1);
        assert_eq!(cpu.registers[2], 2);
        assert_eq!(cpu.pc, 0x206);
    }

    #[test]
    fn test_last_managed_instruction_skips_check() {
        // LD V0, 1 / JP 0x200 — the jump is last, PC stays where it aimed.
        let cpu = cpu_with_program(&[0x60, 0x01, 0x12, 0x00]);
        let block = CompiledBlock::translate(&cpu, 0x200, 2);

        let mut cpu = cpu;
        block.run(&mut cpu).unwrap();

        assert_eq!(cpu.registers[0], 1);
        assert_eq!(cpu.pc, 0x200);
    }

    #[test]
    fn test_fault_propagates_out_of_block() {
        // RET with an empty call stack.
        let mut cpu = cpu_with_program(&[0x00, 0xEE]);
        let block = CompiledBlock::translate(&cpu, 0x200, 1);

        assert!(block.run(&mut cpu).is_err());
    }

    #[test]
    fn test_cache_hit_reuses_translation() {
        let mut cpu = cpu_with_program(&[0x60, 0x05]);
        let mut jit = Recompiler::new();

        let len = jit.get_or_create(&cpu, 0x200, 1).len();
        assert_eq!(jit.len(), 1);

        // Rewriting the region does not invalidate the cached unit; the
        // cache is keyed by entry address only.
        cpu.ram[MEM_START] = 0x61;
        let block = jit.get_or_create(&cpu, 0x200, 1);
        assert_eq!(block.len(), len);

        block.run(&mut cpu).unwrap();
        assert_eq!(jit.len(), 1);
        assert_eq!(cpu.registers[0], 5, "stale block still writes V0");
        assert_eq!(cpu.registers[1], 0);
    }

    #[test]
    fn test_clear_drops_blocks() {
        let cpu = cpu_with_program(&[0x60, 0x05]);
        let mut jit = Recompiler::new();
        jit.get_or_create(&cpu, 0x200, 1);
        jit.get_or_create(&cpu, 0x202, 1);
        assert_eq!(jit.len(), 2);

        jit.clear();
        assert!(jit.is_empty());
    }
}
