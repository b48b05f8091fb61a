//! Measuring and patching realistic x64 function entries through the public
//! API only.

use vpfsr_hook::encode::{redirect_patch, NOP};
use vpfsr_hook::{displaced_instructions, minimum_safe_length, PatchBuffer, MIN_REDIRECT_LEN};

/// mov rax, rsp; mov [rax+8], rbx; mov [rax+0x10], rbp; mov [rax+0x18], rsi;
/// push rdi; sub rsp, 0x60
const FRAME_SETUP: [u8; 22] = [
    0x48, 0x8B, 0xC4, 0x48, 0x89, 0x58, 0x08, 0x48, 0x89, 0x68, 0x10, 0x48, 0x89, 0x70, 0x18,
    0x57, 0x48, 0x83, 0xEC, 0x60, 0xCC, 0xCC,
];

/// mov r11, rsp; push rbx; sub rsp, 0x50; lea rax, [rip+0x1234]
const LEAF_WITH_RIP_LOAD: [u8; 20] = [
    0x4C, 0x8B, 0xDC, 0x53, 0x48, 0x83, 0xEC, 0x50, 0x48, 0x8D, 0x05, 0x34, 0x12, 0x00, 0x00,
    0x90, 0x90, 0x90, 0x90, 0x90,
];

#[test]
fn frame_setup_needs_four_instructions() {
    let len = minimum_safe_length(&FRAME_SETUP, 0x7FFA_0000_1000, MIN_REDIRECT_LEN);
    assert_eq!(len, 15);

    let displaced = displaced_instructions(&FRAME_SETUP[..len], 0x7FFA_0000_1000);
    assert_eq!(displaced.instructions.len(), 4);
    assert!(displaced.complete);
    assert!(!displaced.ip_relative);
}

#[test]
fn rip_relative_lea_inside_span_is_flagged() {
    let len = minimum_safe_length(&LEAF_WITH_RIP_LOAD, 0x1_4000_0000, MIN_REDIRECT_LEN);
    assert_eq!(len, 15);

    let displaced = displaced_instructions(&LEAF_WITH_RIP_LOAD[..len], 0x1_4000_0000);
    assert!(displaced.ip_relative);
    assert!(displaced.complete);
}

#[test]
fn patch_matches_measured_length() {
    let len = minimum_safe_length(&FRAME_SETUP, 0, MIN_REDIRECT_LEN);
    let patch = redirect_patch(0x7FF6_1234_5678, len).expect("length in range");
    assert_eq!(patch.len(), len);
    assert!(patch.as_slice()[MIN_REDIRECT_LEN..].iter().all(|b| *b == NOP));
    assert!(len <= PatchBuffer::CAPACITY);
}

#[test]
fn undecodable_entry_falls_back_to_minimum() {
    let garbage = [0x0F, 0x0B, 0x0F, 0xFF];
    assert_eq!(minimum_safe_length(&garbage, 0, MIN_REDIRECT_LEN), MIN_REDIRECT_LEN);
}
