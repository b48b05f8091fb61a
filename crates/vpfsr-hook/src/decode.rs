//! Instruction-length analysis of a function entry.

use iced_x86::{Decoder, DecoderOptions, Instruction, OpKind, Register};

/// Smallest run of whole instructions starting at `code[0]` that covers at
/// least `min_bytes`.
///
/// `ip` is the address `code` was read from. If an instruction cannot be
/// decoded, or the bytes run out first, `min_bytes` is returned.
pub fn minimum_safe_length(code: &[u8], ip: u64, min_bytes: usize) -> usize {
    let mut decoder = Decoder::with_ip(64, code, ip, DecoderOptions::NONE);
    let mut instruction = Instruction::default();
    let mut total = 0;

    while total < min_bytes {
        if !decoder.can_decode() {
            return min_bytes;
        }
        decoder.decode_out(&mut instruction);
        if instruction.is_invalid() {
            return min_bytes;
        }
        total += instruction.len();
    }

    total
}

/// The instructions overwritten by a patch.
#[derive(Debug, Clone)]
pub struct Displaced {
    pub instructions: Vec<Instruction>,
    /// At least one instruction addresses memory or branches relative to
    /// its own address, so it must be re-encoded to run elsewhere.
    pub ip_relative: bool,
    /// The decoded instructions tile the span exactly.
    pub complete: bool,
}

/// Decode all of `code` (the bytes that will be overwritten) as read from
/// `ip`.
pub fn displaced_instructions(code: &[u8], ip: u64) -> Displaced {
    let mut decoder = Decoder::with_ip(64, code, ip, DecoderOptions::NONE);
    let mut instructions = Vec::new();
    let mut ip_relative = false;
    let mut consumed = 0;

    while decoder.can_decode() {
        let instruction = decoder.decode();
        if instruction.is_invalid() {
            break;
        }
        ip_relative |= is_ip_relative(&instruction);
        consumed += instruction.len();
        instructions.push(instruction);
    }

    Displaced {
        instructions,
        ip_relative,
        complete: consumed == code.len(),
    }
}

fn is_ip_relative(instruction: &Instruction) -> bool {
    (0..instruction.op_count()).any(|i| match instruction.op_kind(i) {
        OpKind::NearBranch16 | OpKind::NearBranch32 | OpKind::NearBranch64 => true,
        OpKind::Memory => matches!(instruction.memory_base(), Register::RIP | Register::EIP),
        _ => false,
    })
}

/// Intel-syntax listing for logs.
pub fn describe(instructions: &[Instruction]) -> String {
    use iced_x86::{Formatter, IntelFormatter};

    let mut formatter = IntelFormatter::new();
    let mut out = String::new();
    for (i, instruction) in instructions.iter().enumerate() {
        if i > 0 {
            out.push_str("; ");
        }
        formatter.format(instruction, &mut out);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    // mov [rsp+8], rbx; push rdi; sub rsp, 0x20; mov rdi, rcx; xor eax, eax
    const PROLOGUE: [u8; 16] = [
        0x48, 0x89, 0x5C, 0x24, 0x08, 0x57, 0x48, 0x83, 0xEC, 0x20, 0x48, 0x8B, 0xF9, 0x33,
        0xC0, 0xC3,
    ];

    #[test]
    fn stops_on_instruction_boundary() {
        // 5 + 1 + 4 + 3 = 13, one more instruction reaches 15.
        assert_eq!(minimum_safe_length(&PROLOGUE, 0x1000, 14), 15);
        assert_eq!(minimum_safe_length(&PROLOGUE, 0x1000, 5), 5);
        assert_eq!(minimum_safe_length(&PROLOGUE, 0x1000, 6), 6);
        assert_eq!(minimum_safe_length(&PROLOGUE, 0x1000, 7), 10);
    }

    #[test]
    fn falls_back_when_bytes_run_out() {
        assert_eq!(minimum_safe_length(&PROLOGUE[..8], 0x1000, 14), 14);
    }

    #[test]
    fn falls_back_on_invalid_opcode() {
        // 0x06 (push es) is invalid in 64-bit mode.
        assert_eq!(minimum_safe_length(&[0x06; 32], 0, 14), 14);
    }

    #[test]
    fn position_independent_prologue_is_copied_verbatim() {
        let displaced = displaced_instructions(&PROLOGUE[..15], 0x1000);
        assert_eq!(displaced.instructions.len(), 5);
        assert!(!displaced.ip_relative);
        assert!(displaced.complete);
    }

    #[test]
    fn detects_rip_relative_operand() {
        // mov rax, [rip+0x10]; nop x7
        let code = [0x48, 0x8B, 0x05, 0x10, 0, 0, 0, 0x90, 0x90, 0x90, 0x90, 0x90, 0x90, 0x90];
        let displaced = displaced_instructions(&code, 0x4000);
        assert!(displaced.ip_relative);
        assert!(displaced.complete);
    }

    #[test]
    fn detects_relative_branch() {
        // call rel32; nop x9
        let mut code = vec![0xE8, 0x00, 0x01, 0x00, 0x00];
        code.extend([0x90; 9]);
        assert!(displaced_instructions(&code, 0x4000).ip_relative);
    }

    #[test]
    fn partial_tail_is_incomplete() {
        // Cut the `sub rsp, 0x20` in half.
        let displaced = displaced_instructions(&PROLOGUE[..8], 0x1000);
        assert!(!displaced.complete);
        assert_eq!(displaced.instructions.len(), 2);
    }

    #[test]
    fn listing_uses_intel_syntax() {
        let displaced = displaced_instructions(&PROLOGUE[5..6], 0);
        assert_eq!(describe(&displaced.instructions), "push rdi");
    }
}
