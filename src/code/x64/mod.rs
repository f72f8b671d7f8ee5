//! x86-64 specific encodings

/// Length of [`jmp_abs`]
pub const JMP_ABS_LEN: usize = 14;

/// Generates an absolute jump to a specified address and returns bytecode
///
/// `jmp [rip + 0]` followed by the 8-byte target, so it reaches anywhere in the address space.
pub fn jmp_abs(target: usize) -> [u8; JMP_ABS_LEN] {
    let mut code = [0u8; JMP_ABS_LEN];
    code[..6].copy_from_slice(&[0xff, 0x25, 0x00, 0x00, 0x00, 0x00]);
    code[6..].copy_from_slice(&(target as u64).to_le_bytes());
    code
}
