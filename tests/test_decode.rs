//! Decoder totality over the 16-bit word space.
use chip8_vm::prelude::*;

/// Every word either maps to exactly one shared descriptor or faults with
/// the raw word; nothing is silently skipped, and repeated decodes agree.
#[test]
fn test_decode_is_total_and_deterministic() {
    for word in 0..=u16::MAX {
        match (decode(word), decode(word)) {
            (Ok(a), Ok(b)) => {
                assert!(std::ptr::eq(a, b), "{word:04X} must share one descriptor");
                assert!(a.operand_bits <= 12);
            }
            (Err(a), Err(b)) => {
                assert_eq!(a, Chip8Error::Decode { word });
                assert_eq!(a, b);
            }
            _ => panic!("{word:04X} decoded inconsistently"),
        }
    }
}

/// The operand mask always selects the declared low bits.
#[test]
fn test_operand_extraction_follows_descriptor() {
    for word in [0x1234u16, 0x6AFF, 0x00E0, 0xF129, 0xDEAD & 0xDFFF] {
        if let Ok(instr) = decode(word) {
            let arg = operand(word, instr.operand_bits);
            assert_eq!(arg, word & ((1 << instr.operand_bits) - 1));
        }
    }
}
