//! # Code
//!
//! Encoders for the few branch instructions the engine writes itself

#[cfg(target_arch = "x86_64")]
pub mod x64;

/// Length of a near `call rel32` / `jmp rel32`
pub const REL32_LEN: usize = 5;
/// Opcode of `call rel32`
pub const CALL_REL32: u8 = 0xE8;
/// Opcode of `jmp rel32`
pub const JMP_REL32: u8 = 0xE9;

/// Computes the rel32 displacement of a 5-byte branch at `source` landing on `target`.
///
/// Returns `None` if the target is more than 2 GiB away. On 32-bit hosts the address space wraps,
/// so every target is reachable.
#[cfg(target_pointer_width = "32")]
pub fn rel32(source: usize, target: usize) -> Option<i32> {
    let next = (source as u32).wrapping_add(REL32_LEN as u32);
    Some((target as u32).wrapping_sub(next) as i32)
}

/// Computes the rel32 displacement of a 5-byte branch at `source` landing on `target`.
///
/// Returns `None` if the target is more than 2 GiB away.
#[cfg(not(target_pointer_width = "32"))]
pub fn rel32(source: usize, target: usize) -> Option<i32> {
    let next = source as i128 + REL32_LEN as i128;
    i32::try_from(target as i128 - next).ok()
}

/// Encodes `opcode rel32` placed at `source` and branching to `target`
pub fn branch_rel32(opcode: u8, source: usize, target: usize) -> Option<[u8; REL32_LEN]> {
    let disp = rel32(source, target)?.to_le_bytes();
    Some([opcode, disp[0], disp[1], disp[2], disp[3]])
}

/// Decodes the destination of the 5-byte branch `instr` located at `source`
pub fn branch_target(source: usize, instr: &[u8; REL32_LEN]) -> usize {
    let disp = i32::from_le_bytes([instr[1], instr[2], instr[3], instr[4]]);
    source
        .wrapping_add(REL32_LEN)
        .wrapping_add(disp as isize as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_call() {
        let bytes = branch_rel32(CALL_REL32, 0x7B6826, 0x7C0000).unwrap();
        assert_eq!(bytes, [0xE8, 0xD5, 0x97, 0x00, 0x00]);
        assert_eq!(rel32(0x7B6826, 0x7C0000), Some(0x7C0000 - (0x7B6826 + 5)));
    }

    #[test]
    /// Backward branches use a two's complement displacement
    fn test_backward_jmp() {
        let bytes = branch_rel32(JMP_REL32, 0x7B6826, 0x401000).unwrap();
        assert_eq!(bytes, [0xE9, 0xD5, 0xA7, 0xC4, 0xFF]);
        assert_eq!(
            i32::from_le_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]),
            0x401000 - (0x7B6826 + 5)
        );
    }

    #[test]
    fn test_branch_target() {
        let forward = branch_rel32(CALL_REL32, 0xADFB73, 0xADF6E0).unwrap();
        assert_eq!(branch_target(0xADFB73, &forward), 0xADF6E0);

        let backward = branch_rel32(JMP_REL32, 0x51E040, 0x10000).unwrap();
        assert_eq!(branch_target(0x51E040, &backward), 0x10000);
    }

    #[test]
    /// A branch onto the next instruction has a zero displacement
    fn test_zero_displacement() {
        assert_eq!(rel32(0x1000, 0x1005), Some(0));
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn test_out_of_range() {
        assert_eq!(rel32(0x1000, 0x1_0000_1005), None);
        assert_eq!(rel32(0x1000, 0x8000_1004), Some(i32::MAX));
        assert_eq!(rel32(0x1000, 0x8000_1005), None);
    }
}
