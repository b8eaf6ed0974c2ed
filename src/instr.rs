//! Instruction descriptors, effects and the decoder.
//!
//! Each opcode family has exactly one immutable [`Instruction`] descriptor,
//! shared by every execution. The descriptor declares how many low bits of
//! the raw word are operand data, and whether the effect manages the program
//! counter itself instead of relying on the default post-increment.
use rand::Rng;

use crate::{
    constants::*,
    cpu::Chip8Cpu,
    error::{Chip8Error, Chip8Result},
};

/// A pure state transition: given machine state and operand value, mutate
/// state. Faults (call stack bounds) propagate to the caller.
pub type Effect = fn(&mut Chip8Cpu, u16) -> Chip8Result<()>;

/// Identity tag carried by each descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    SysNoOp,
    ClearScreen,
    Return,
    Jump,
    Call,
    SkipEqImm,
    SkipNeImm,
    SkipEqReg,
    SkipNeReg,
    LoadImm,
    AddImm,
    Move,
    Or,
    And,
    Xor,
    AddCarry,
    SubX,
    SubY,
    ShiftRight,
    ShiftLeft,
    LoadIndex,
    AddIndex,
    FontCharacter,
    Random,
    Draw,
    Bcd,
    Store,
    Read,
    LoadDelay,
    ReadDelay,
}

/// Immutable instruction descriptor.
#[derive(Debug, PartialEq)]
pub struct Instruction {
    pub op: Op,
    /// Mnemonic for traces and troubleshooting dumps.
    pub name: &'static str,
    /// Symbolic pattern documenting which nibbles are opcode vs. operand.
    pub encoding: &'static str,
    /// How many low bits of the raw word are passed to the effect.
    pub operand_bits: u8,
    /// The effect fully determines the next program counter value
    /// (branches, calls, returns, conditional skips). Everything else
    /// relies on the interpreter's default `pc += 2`.
    pub manages_pc: bool,
    pub effect: Effect,
}

/// Extract the operand: the low N bits where N is the descriptor's declared
/// operand width.
#[inline(always)]
pub fn operand(word: u16, operand_bits: u8) -> u16 {
    word & (((1u32 << operand_bits) - 1) as u16)
}

/// Map a raw 16-bit instruction word to its descriptor.
///
/// Pure and total except for unassigned patterns, which fail with the raw
/// word. The top 4 bits select a family; the `8` and `F` families dispatch
/// further on the low nibble or low byte. `00E0` and `00EE` are carved out
/// of the otherwise operand-bearing system family.
pub fn decode(word: u16) -> Chip8Result<&'static Instruction> {
    match word >> 12 {
        0x0 => match word {
            0x00E0 => Ok(&CLEAR_SCREEN),
            0x00EE => Ok(&RETURN),
            _ => Ok(&SYS_NO_OP),
        },
        0x1 => Ok(&JUMP),
        0x2 => Ok(&CALL),
        0x3 => Ok(&SKIP_EQ_IMM),
        0x4 => Ok(&SKIP_NE_IMM),
        0x5 => Ok(&SKIP_EQ_REG),
        0x6 => Ok(&LOAD_IMM),
        0x7 => Ok(&ADD_IMM),
        0x8 => match word & 0xF {
            0x0 => Ok(&MOVE),
            0x1 => Ok(&OR),
            0x2 => Ok(&AND),
            0x3 => Ok(&XOR),
            0x4 => Ok(&ADD_CARRY),
            0x5 => Ok(&SUB_X),
            0x6 => Ok(&SHIFT_RIGHT),
            0x7 => Ok(&SUB_Y),
            0xE => Ok(&SHIFT_LEFT),
            _ => Err(Chip8Error::Decode { word }),
        },
        0x9 => Ok(&SKIP_NE_REG),
        0xA => Ok(&LOAD_INDEX),
        0xC => Ok(&RANDOM),
        0xD => Ok(&DRAW),
        0xF => match word & 0xFF {
            0x07 => Ok(&READ_DELAY),
            0x15 => Ok(&LOAD_DELAY),
            0x1E => Ok(&ADD_INDEX),
            0x29 => Ok(&FONT_CHARACTER),
            0x33 => Ok(&BCD),
            0x55 => Ok(&STORE),
            0x65 => Ok(&READ),
            _ => Err(Chip8Error::Decode { word }),
        },
        _ => Err(Chip8Error::Decode { word }),
    }
}

// ----------------------------------------------------------------------------
// Descriptor table

macro_rules! instruction {
    ($ident:ident, $op:ident, $name:expr, $encoding:expr, $bits:expr, $manages_pc:expr, $effect:ident) => {
        pub static $ident: Instruction = Instruction {
            op: Op::$op,
            name: $name,
            encoding: $encoding,
            operand_bits: $bits,
            manages_pc: $manages_pc,
            effect: $effect,
        };
    };
}

instruction!(SYS_NO_OP, SysNoOp, "SYS (NO-OP)", "0NNN", 0, false, sys_no_op);
instruction!(CLEAR_SCREEN, ClearScreen, "CLS", "00E0", 0, false, clear_screen);
instruction!(RETURN, Return, "RET", "00EE", 0, true, ret);
instruction!(JUMP, Jump, "JP r12", "1NNN", 12, true, jump);
instruction!(CALL, Call, "CALL r12", "2NNN", 12, true, call);
instruction!(SKIP_EQ_IMM, SkipEqImm, "SE Vx, r8", "3XNN", 12, true, skip_eq_imm);
instruction!(SKIP_NE_IMM, SkipNeImm, "SNE Vx, r8", "4XNN", 12, true, skip_ne_imm);
instruction!(SKIP_EQ_REG, SkipEqReg, "SE Vx, Vy", "5XY0", 12, true, skip_eq_reg);
instruction!(SKIP_NE_REG, SkipNeReg, "SNE Vx, Vy", "9XY0", 12, true, skip_ne_reg);
instruction!(LOAD_IMM, LoadImm, "LD Vx, r8", "6XNN", 12, false, load_imm);
instruction!(ADD_IMM, AddImm, "ADD Vx, r8", "7XNN", 12, false, add_imm);
instruction!(MOVE, Move, "LD Vx, Vy", "8XY0", 12, false, move_reg);
instruction!(OR, Or, "OR Vx, Vy", "8XY1", 12, false, or);
instruction!(AND, And, "AND Vx, Vy", "8XY2", 12, false, and);
instruction!(XOR, Xor, "XOR Vx, Vy", "8XY3", 12, false, xor);
instruction!(ADD_CARRY, AddCarry, "ADD+C Vx, Vy", "8XY4", 12, false, add_carry);
instruction!(SUB_X, SubX, "SUB Vx, Vy", "8XY5", 12, false, sub_x);
instruction!(SUB_Y, SubY, "SUB Vy, Vx", "8XY7", 12, false, sub_y);
instruction!(SHIFT_RIGHT, ShiftRight, "SHR Vx", "8XY6", 12, false, shift_right);
instruction!(SHIFT_LEFT, ShiftLeft, "SHL Vx", "8XYE", 12, false, shift_left);
instruction!(LOAD_INDEX, LoadIndex, "LD I, r12", "ANNN", 12, false, load_index);
instruction!(ADD_INDEX, AddIndex, "ADD I, Vx", "FX1E", 12, false, add_index);
instruction!(FONT_CHARACTER, FontCharacter, "LD I (FONT), Vx", "FX29", 12, false, font_character);
instruction!(RANDOM, Random, "RAND Vx, d8", "CXNN", 12, false, random);
instruction!(DRAW, Draw, "DRAW Vx, Vy, r4", "DXYN", 12, false, draw);
instruction!(BCD, Bcd, "LD [I] (BCD), Vx", "FX33", 12, false, bcd);
instruction!(STORE, Store, "LD [I], Vx", "FX55", 12, false, store);
instruction!(READ, Read, "LD Vx, [I]", "FX65", 12, false, read);
instruction!(LOAD_DELAY, LoadDelay, "LD DT, Vx", "FX15", 12, false, load_delay);
instruction!(READ_DELAY, ReadDelay, "LD Vx, DT", "FX07", 12, false, read_delay);

// ----------------------------------------------------------------------------
// Operand helpers

/// Register X from the high nibble of a 12-bit operand.
#[inline(always)]
fn reg_x(arg: u16) -> usize {
    (arg >> 8) as usize
}

/// Register Y from the middle nibble of a 12-bit operand.
#[inline(always)]
fn reg_y(arg: u16) -> usize {
    ((arg >> 4) & 0xF) as usize
}

#[inline(always)]
fn imm_nn(arg: u16) -> u8 {
    (arg & 0xFF) as u8
}

// ----------------------------------------------------------------------------
// Control flow

/// 0NNN (SYS addr)
///
/// Machine routine call on the original hardware. Accepted and ignored.
fn sys_no_op(_cpu: &mut Chip8Cpu, _arg: u16) -> Chip8Result<()> {
    Ok(())
}

/// 1NNN (JP addr)
///
/// Jump to address.
fn jump(cpu: &mut Chip8Cpu, arg: u16) -> Chip8Result<()> {
    cpu.pc = arg;
    Ok(())
}

/// 2NNN (CALL addr)
///
/// Call subroutine at NNN. The return address is the instruction after the
/// call.
fn call(cpu: &mut Chip8Cpu, arg: u16) -> Chip8Result<()> {
    let ret = cpu.pc + 2;
    cpu.push(ret)?;
    cpu.pc = arg;
    Ok(())
}

/// 00EE (RET)
///
/// Return from a subroutine by popping the program counter off the stack.
fn ret(cpu: &mut Chip8Cpu, _arg: u16) -> Chip8Result<()> {
    cpu.pc = cpu.pop()?;
    Ok(())
}

/// 3XNN (SE Vx, byte)
///
/// Skip the next instruction if register VX equals value NN.
fn skip_eq_imm(cpu: &mut Chip8Cpu, arg: u16) -> Chip8Result<()> {
    cpu.pc += if cpu.registers[reg_x(arg)] == imm_nn(arg) {
        4
    } else {
        2
    };
    Ok(())
}

/// 4XNN (SNE Vx, byte)
///
/// Skip the next instruction if register VX does not equal value NN.
fn skip_ne_imm(cpu: &mut Chip8Cpu, arg: u16) -> Chip8Result<()> {
    cpu.pc += if cpu.registers[reg_x(arg)] != imm_nn(arg) {
        4
    } else {
        2
    };
    Ok(())
}

/// 5XY0 (SE Vx, Vy)
///
/// Skip the next instruction if register VX equals register VY.
fn skip_eq_reg(cpu: &mut Chip8Cpu, arg: u16) -> Chip8Result<()> {
    cpu.pc += if cpu.registers[reg_x(arg)] == cpu.registers[reg_y(arg)] {
        4
    } else {
        2
    };
    Ok(())
}

/// 9XY0 (SNE Vx, Vy)
///
/// Skip the next instruction if register VX does not equal register VY.
fn skip_ne_reg(cpu: &mut Chip8Cpu, arg: u16) -> Chip8Result<()> {
    cpu.pc += if cpu.registers[reg_x(arg)] != cpu.registers[reg_y(arg)] {
        4
    } else {
        2
    };
    Ok(())
}

// ----------------------------------------------------------------------------
// Registers

/// 6XNN (LD Vx, byte)
///
/// Set register VX to value NN.
fn load_imm(cpu: &mut Chip8Cpu, arg: u16) -> Chip8Result<()> {
    cpu.registers[reg_x(arg)] = imm_nn(arg);
    Ok(())
}

/// 7XNN (ADD Vx, byte)
///
/// Add value NN to register VX. Overflow wraps; the carry flag is not set.
fn add_imm(cpu: &mut Chip8Cpu, arg: u16) -> Chip8Result<()> {
    let x = reg_x(arg);
    cpu.registers[x] = cpu.registers[x].wrapping_add(imm_nn(arg));
    Ok(())
}

/// 8XY0 (LD Vx, Vy)
///
/// Store the value of register VY in register VX.
fn move_reg(cpu: &mut Chip8Cpu, arg: u16) -> Chip8Result<()> {
    cpu.registers[reg_x(arg)] = cpu.registers[reg_y(arg)];
    Ok(())
}

/// 8XY1 (OR Vx, Vy)
fn or(cpu: &mut Chip8Cpu, arg: u16) -> Chip8Result<()> {
    cpu.registers[reg_x(arg)] |= cpu.registers[reg_y(arg)];
    Ok(())
}

/// 8XY2 (AND Vx, Vy)
fn and(cpu: &mut Chip8Cpu, arg: u16) -> Chip8Result<()> {
    cpu.registers[reg_x(arg)] &= cpu.registers[reg_y(arg)];
    Ok(())
}

/// 8XY3 (XOR Vx, Vy)
fn xor(cpu: &mut Chip8Cpu, arg: u16) -> Chip8Result<()> {
    cpu.registers[reg_x(arg)] ^= cpu.registers[reg_y(arg)];
    Ok(())
}

/// 8XY4 (ADD Vx, Vy)
///
/// Add VY to VX. The result is truncated to 8 bits; VF is 1 iff the unsigned
/// sum exceeds 255. The flag is written before the result, so VF as a
/// destination holds the truncated sum.
fn add_carry(cpu: &mut Chip8Cpu, arg: u16) -> Chip8Result<()> {
    let (x, y) = (reg_x(arg), reg_y(arg));
    let sum = cpu.registers[x] as u16 + cpu.registers[y] as u16;
    cpu.registers[FLAG_REGISTER] = (sum > 0xFF) as u8;
    cpu.registers[x] = sum as u8;
    Ok(())
}

/// 8XY5 (SUB Vx, Vy)
///
/// Subtract VY from VX. VF is 1 iff VX > VY before the subtraction
/// ("no borrow"), written before the result.
fn sub_x(cpu: &mut Chip8Cpu, arg: u16) -> Chip8Result<()> {
    let (x, y) = (reg_x(arg), reg_y(arg));
    cpu.registers[FLAG_REGISTER] = (cpu.registers[x] > cpu.registers[y]) as u8;
    cpu.registers[x] = cpu.registers[x].wrapping_sub(cpu.registers[y]);
    Ok(())
}

/// 8XY7 (SUB Vy, Vx)
///
/// Mirrored operand order: subtract VX from VY, result in VY. VF is 1 iff
/// VY > VX before the subtraction.
fn sub_y(cpu: &mut Chip8Cpu, arg: u16) -> Chip8Result<()> {
    let (x, y) = (reg_x(arg), reg_y(arg));
    cpu.registers[FLAG_REGISTER] = (cpu.registers[y] > cpu.registers[x]) as u8;
    cpu.registers[y] = cpu.registers[y].wrapping_sub(cpu.registers[x]);
    Ok(())
}

/// 8XY6 (SHR Vx)
///
/// Shift VX right by 1. The shifted-out bit lands in VF. With the
/// `legacy_shift` quirk, VY is copied into VX first.
fn shift_right(cpu: &mut Chip8Cpu, arg: u16) -> Chip8Result<()> {
    let x = reg_x(arg);
    if cpu.quirks.legacy_shift {
        cpu.registers[x] = cpu.registers[reg_y(arg)];
    }
    let value = cpu.registers[x];
    cpu.registers[FLAG_REGISTER] = value & 1;
    cpu.registers[x] = value >> 1;
    Ok(())
}

/// 8XYE (SHL Vx)
///
/// Shift VX left by 1. The shifted-out bit lands in VF. With the
/// `legacy_shift` quirk, VY is copied into VX first.
fn shift_left(cpu: &mut Chip8Cpu, arg: u16) -> Chip8Result<()> {
    let x = reg_x(arg);
    if cpu.quirks.legacy_shift {
        cpu.registers[x] = cpu.registers[reg_y(arg)];
    }
    let value = cpu.registers[x];
    cpu.registers[FLAG_REGISTER] = value >> 7;
    cpu.registers[x] = value << 1;
    Ok(())
}

// ----------------------------------------------------------------------------
// Index register

/// ANNN (LD I, addr)
///
/// Set address register I to value NNN.
fn load_index(cpu: &mut Chip8Cpu, arg: u16) -> Chip8Result<()> {
    cpu.index = arg;
    Ok(())
}

/// FX1E (ADD I, Vx)
///
/// Add VX to I. No overflow flag is defined.
fn add_index(cpu: &mut Chip8Cpu, arg: u16) -> Chip8Result<()> {
    cpu.index = cpu.index.wrapping_add(cpu.registers[reg_x(arg)] as u16);
    Ok(())
}

/// FX29 (LD F, Vx)
///
/// Set I to the address of the builtin glyph for the low nibble of VX.
fn font_character(cpu: &mut Chip8Cpu, arg: u16) -> Chip8Result<()> {
    let digit = (cpu.registers[reg_x(arg)] & 0xF) as usize;
    cpu.index = (FONTSET_START + digit * FONTSET_HEIGHT) as Address;
    Ok(())
}

// ----------------------------------------------------------------------------
// Bulk memory

/// FX55 (LD [I], Vx)
///
/// Store registers V0 through VX in memory starting at location I. With the
/// `legacy_index_increment` quirk, I is moved past the stored range.
fn store(cpu: &mut Chip8Cpu, arg: u16) -> Chip8Result<()> {
    let x = reg_x(arg);
    let addr = cpu.index as usize;
    for i in 0..=x {
        cpu.ram[(addr + i) & (MEM_SIZE - 1)] = cpu.registers[i];
    }
    if cpu.quirks.legacy_index_increment {
        cpu.index = cpu.index.wrapping_add(x as u16 + 1);
    }
    Ok(())
}

/// FX65 (LD Vx, [I])
///
/// Read registers V0 through VX from memory starting at location I. With the
/// `legacy_index_increment` quirk, I is moved past the read range.
fn read(cpu: &mut Chip8Cpu, arg: u16) -> Chip8Result<()> {
    let x = reg_x(arg);
    let addr = cpu.index as usize;
    for i in 0..=x {
        cpu.registers[i] = cpu.ram[(addr + i) & (MEM_SIZE - 1)];
    }
    if cpu.quirks.legacy_index_increment {
        cpu.index = cpu.index.wrapping_add(x as u16 + 1);
    }
    Ok(())
}

/// FX33 (LD B, Vx)
///
/// Store the binary-coded decimal representation of VX in the memory
/// locations I, I+1, and I+2.
#[rustfmt::skip]
fn bcd(cpu: &mut Chip8Cpu, arg: u16) -> Chip8Result<()> {
    let value = cpu.registers[reg_x(arg)];
    let addr = cpu.index as usize;
    cpu.ram[addr       & (MEM_SIZE - 1)] = value / 100;
    cpu.ram[(addr + 1) & (MEM_SIZE - 1)] = value / 10 % 10;
    cpu.ram[(addr + 2) & (MEM_SIZE - 1)] = value % 10;
    Ok(())
}

// ----------------------------------------------------------------------------
// Drawing

/// XOR one sprite byte into the packed framebuffer, recording collisions.
#[inline]
fn xor_row(vram: &mut [u8; DISPLAY_BUFFER_SIZE], at: usize, data: u8, flag: &mut u8) {
    if vram[at] & data != 0 {
        *flag = 1;
    }
    vram[at] ^= data;
}

/// DXYN (DRW Vx, Vy, nibble)
///
/// Draw an N-row sprite read from memory at I, at coordinate (VX, VY).
/// The x coordinate wraps into the 64-wide field and y into the 32-tall
/// field; rows that would run past the bottom edge are not drawn. A sprite
/// row that is not byte-aligned straddles two framebuffer bytes and is
/// written in two halves; the low half is dropped at the right edge rather
/// than wrapped. VF is set to 1 if any drawn pixel collided with an
/// already-set pixel.
fn draw(cpu: &mut Chip8Cpu, arg: u16) -> Chip8Result<()> {
    let x = cpu.registers[reg_x(arg)] & DISPLAY_WIDTH_MASK;
    let mut y = cpu.registers[reg_y(arg)] & DISPLAY_HEIGHT_MASK;
    let rows = arg & 0xF;

    let mut flag = 0u8;
    let offset = (x & 0x7) as u32;

    for row in 0..rows {
        let sprite = cpu.ram[(cpu.index as usize + row as usize) & (MEM_SIZE - 1)];
        let at = (x as usize / 8) + (y as usize) * (DISPLAY_WIDTH / 8);

        if offset == 0 {
            xor_row(&mut cpu.vram, at, sprite, &mut flag);
        } else {
            xor_row(&mut cpu.vram, at, sprite >> offset, &mut flag);

            // The second half falls off the right edge for x >= 56.
            if x < (DISPLAY_WIDTH - 8) as u8 {
                xor_row(&mut cpu.vram, at + 1, sprite << (8 - offset), &mut flag);
            }
        }

        y += 1;
        if y > DISPLAY_HEIGHT_MASK {
            break;
        }
    }

    cpu.vram_dirty = true;
    cpu.registers[FLAG_REGISTER] = flag;
    Ok(())
}

/// 00E0 (CLS)
///
/// Clear the display.
fn clear_screen(cpu: &mut Chip8Cpu, _arg: u16) -> Chip8Result<()> {
    cpu.clear_display();
    Ok(())
}

// ----------------------------------------------------------------------------
// Timers

/// FX15 (LD DT, Vx)
///
/// Load the delay timer from VX.
fn load_delay(cpu: &mut Chip8Cpu, arg: u16) -> Chip8Result<()> {
    cpu.delay_timer = cpu.registers[reg_x(arg)];
    Ok(())
}

/// FX07 (LD Vx, DT)
///
/// Read the delay timer into VX.
fn read_delay(cpu: &mut Chip8Cpu, arg: u16) -> Chip8Result<()> {
    cpu.registers[reg_x(arg)] = cpu.delay_timer;
    Ok(())
}

// ----------------------------------------------------------------------------
// Misc

/// CXNN (RND Vx, byte)
///
/// Set VX to a random byte bitwise ANDed with NN.
fn random(cpu: &mut Chip8Cpu, arg: u16) -> Chip8Result<()> {
    cpu.registers[reg_x(arg)] = cpu.rng.gen::<u8>() & imm_nn(arg);
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    fn exec(cpu: &mut Chip8Cpu, word: u16) {
        let instr = decode(word).unwrap();
        (instr.effect)(cpu, operand(word, instr.operand_bits)).unwrap();
    }

    #[test]
    fn test_decode_families() {
        assert_eq!(decode(0x00E0).unwrap().op, Op::ClearScreen);
        assert_eq!(decode(0x00EE).unwrap().op, Op::Return);
        assert_eq!(decode(0x0123).unwrap().op, Op::SysNoOp);
        assert_eq!(decode(0x1234).unwrap().op, Op::Jump);
        assert_eq!(decode(0x2345).unwrap().op, Op::Call);
        assert_eq!(decode(0x3A42).unwrap().op, Op::SkipEqImm);
        assert_eq!(decode(0x4A42).unwrap().op, Op::SkipNeImm);
        assert_eq!(decode(0x5AB0).unwrap().op, Op::SkipEqReg);
        assert_eq!(decode(0x6A42).unwrap().op, Op::LoadImm);
        assert_eq!(decode(0x7A42).unwrap().op, Op::AddImm);
        assert_eq!(decode(0x8AB4).unwrap().op, Op::AddCarry);
        assert_eq!(decode(0x8ABE).unwrap().op, Op::ShiftLeft);
        assert_eq!(decode(0x9AB0).unwrap().op, Op::SkipNeReg);
        assert_eq!(decode(0xA123).unwrap().op, Op::LoadIndex);
        assert_eq!(decode(0xC0FF).unwrap().op, Op::Random);
        assert_eq!(decode(0xD125).unwrap().op, Op::Draw);
        assert_eq!(decode(0xF065).unwrap().op, Op::Read);
    }

    #[test]
    fn test_decode_is_deterministic() {
        for word in [0x00E0u16, 0x1234, 0x8AB4, 0xF133] {
            let a = decode(word).unwrap();
            let b = decode(word).unwrap();
            assert_eq!(a.op, b.op);
            assert!(std::ptr::eq(a, b));
        }
    }

    #[test]
    fn test_decode_faults_carry_raw_word() {
        // Unassigned patterns never silently succeed.
        for word in [0x8AB8u16, 0x8ABF, 0xB123, 0xE09E, 0xE0A1, 0xF00A, 0xF018, 0xF0FF] {
            assert_eq!(decode(word), Err(Chip8Error::Decode { word }));
        }
    }

    #[test]
    fn test_operand_masking() {
        assert_eq!(operand(0x1234, 12), 0x234);
        assert_eq!(operand(0xFABC, 12), 0xABC);
        assert_eq!(operand(0x00EE, 0), 0);
        assert_eq!(operand(0xFFFF, 8), 0xFF);
    }

    #[test]
    fn test_add_carry_flag() {
        let mut cpu = Chip8Cpu::new();
        cpu.registers[0] = 200;
        cpu.registers[1] = 100;

        exec(&mut cpu, 0x8014); // ADD+C V0, V1
        assert_eq!(cpu.registers[0], 44); // 300 truncated
        assert_eq!(cpu.registers[0xF], 1);

        cpu.registers[0] = 10;
        exec(&mut cpu, 0x8014);
        assert_eq!(cpu.registers[0], 110);
        assert_eq!(cpu.registers[0xF], 0);
    }

    #[test]
    fn test_sub_borrow_both_orders() {
        let mut cpu = Chip8Cpu::new();

        // SUB Vx, Vy: flag is 1 iff Vx > Vy.
        cpu.registers[0] = 10;
        cpu.registers[1] = 3;
        exec(&mut cpu, 0x8015);
        assert_eq!(cpu.registers[0], 7);
        assert_eq!(cpu.registers[0xF], 1);

        cpu.registers[0] = 3;
        cpu.registers[1] = 10;
        exec(&mut cpu, 0x8015);
        assert_eq!(cpu.registers[0], 249); // wrapped
        assert_eq!(cpu.registers[0xF], 0);

        // SUB Vy, Vx: mirrored, result lands in Vy.
        cpu.registers[0] = 3;
        cpu.registers[1] = 10;
        exec(&mut cpu, 0x8017);
        assert_eq!(cpu.registers[1], 7);
        assert_eq!(cpu.registers[0xF], 1);
    }

    #[test]
    fn test_shifts_capture_shifted_out_bit() {
        let mut cpu = Chip8Cpu::new();

        cpu.registers[2] = 0b1000_0101;
        exec(&mut cpu, 0x8206); // SHR V2
        assert_eq!(cpu.registers[2], 0b0100_0010);
        assert_eq!(cpu.registers[0xF], 1);

        exec(&mut cpu, 0x820E); // SHL V2
        assert_eq!(cpu.registers[2], 0b1000_0100);
        assert_eq!(cpu.registers[0xF], 0);
    }

    #[test]
    fn test_legacy_shift_quirk() {
        let mut cpu = Chip8Cpu::new();
        cpu.quirks.legacy_shift = true;

        cpu.registers[2] = 0xFF;
        cpu.registers[3] = 0b0000_0110;
        exec(&mut cpu, 0x8236); // SHR V2 (copies V3 first)
        assert_eq!(cpu.registers[2], 0b0000_0011);
        assert_eq!(cpu.registers[0xF], 0);
    }

    #[test]
    fn test_font_character_addresses() {
        let mut cpu = Chip8Cpu::new();

        cpu.registers[4] = 0x0;
        exec(&mut cpu, 0xF429);
        assert_eq!(cpu.index, FONTSET_START as u16);

        cpu.registers[4] = 0xA7; // only the low nibble selects the glyph
        exec(&mut cpu, 0xF429);
        assert_eq!(cpu.index, (FONTSET_START + 7 * FONTSET_HEIGHT) as u16);
    }

    #[test]
    fn test_store_read_round_trip() {
        let mut cpu = Chip8Cpu::new();
        for i in 0..REGISTER_COUNT {
            cpu.registers[i] = (i as u8) * 3 + 1;
        }
        let snapshot = cpu.registers;
        cpu.index = 0x300;

        exec(&mut cpu, 0xFA55); // store V0..=VA
        cpu.registers[..=0xA].fill(0);
        exec(&mut cpu, 0xFA65); // read V0..=VA

        assert_eq!(cpu.registers, snapshot);
        assert_eq!(cpu.index, 0x300); // no increment by default
    }

    #[test]
    fn test_legacy_index_increment_quirk() {
        let mut cpu = Chip8Cpu::new();
        cpu.quirks.legacy_index_increment = true;
        cpu.index = 0x300;

        exec(&mut cpu, 0xF355); // store V0..=V3
        assert_eq!(cpu.index, 0x304);
    }

    #[test]
    fn test_bcd_digits() {
        let mut cpu = Chip8Cpu::new();
        cpu.registers[6] = 253;
        cpu.index = 0x400;

        exec(&mut cpu, 0xF633);
        assert_eq!(&cpu.ram[0x400..0x403], &[2, 5, 3]);
    }

    #[test]
    fn test_draw_aligned_and_split() {
        let mut cpu = Chip8Cpu::new();
        cpu.ram[0x300] = 0xF0;
        cpu.index = 0x300;

        // Aligned: x = 0.
        cpu.registers[0] = 0;
        cpu.registers[1] = 0;
        exec(&mut cpu, 0xD011);
        assert_eq!(cpu.vram[0], 0xF0);
        assert_eq!(cpu.registers[0xF], 0);
        assert!(cpu.vram_dirty);

        // Misaligned: x = 4 lands half in byte 0, half in byte 1.
        cpu.clear_display();
        cpu.registers[0] = 4;
        exec(&mut cpu, 0xD011);
        assert_eq!(cpu.vram[0], 0x0F);
        assert_eq!(cpu.vram[1], 0x00);
        assert_eq!(cpu.registers[0xF], 0);
    }

    #[test]
    fn test_draw_collision_flag() {
        let mut cpu = Chip8Cpu::new();
        cpu.ram[0x300] = 0b1100_0000;
        cpu.index = 0x300;
        cpu.registers[0] = 0;
        cpu.registers[1] = 0;

        exec(&mut cpu, 0xD011);
        assert_eq!(cpu.registers[0xF], 0);

        // Drawing the same sprite again erases it and reports the collision.
        exec(&mut cpu, 0xD011);
        assert_eq!(cpu.registers[0xF], 1);
        assert_eq!(cpu.vram[0], 0);
    }

    #[test]
    fn test_draw_right_edge_does_not_wrap() {
        let mut cpu = Chip8Cpu::new();
        cpu.ram[0x300] = 0xFF;
        cpu.index = 0x300;
        cpu.registers[0] = 60; // last 4 pixels of the row
        cpu.registers[1] = 0;

        exec(&mut cpu, 0xD011);
        assert_eq!(cpu.vram[7], 0x0F);
        assert_eq!(cpu.vram[8], 0, "second half must not spill into row 1");
    }

    #[test]
    fn test_draw_stops_at_bottom_edge() {
        let mut cpu = Chip8Cpu::new();
        cpu.ram[0x300..0x304].fill(0xFF);
        cpu.index = 0x300;
        cpu.registers[0] = 0;
        cpu.registers[1] = 30;

        exec(&mut cpu, 0xD014); // 4 rows from y = 30; only 30 and 31 fit
        assert_eq!(cpu.vram[30 * 8], 0xFF);
        assert_eq!(cpu.vram[31 * 8], 0xFF);
        assert_eq!(cpu.vram[0], 0, "rows must not wrap past the bottom edge");
    }

    #[test]
    fn test_random_is_masked() {
        let mut cpu = Chip8Cpu::new();
        for _ in 0..32 {
            exec(&mut cpu, 0xC00F);
            assert_eq!(cpu.registers[0] & 0xF0, 0);
        }
    }
}
