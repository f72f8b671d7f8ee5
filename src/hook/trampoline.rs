//! # Trampoline
//!
//! The only place the engine assembles code of its own: stubs that live near a hooked instruction
//! so a rel32 branch can reach them.

use crate::alloc::{allocate_near, AllocError, ExecutableMemory};
use crate::code::{branch_rel32, JMP_REL32, REL32_LEN};
use crate::error::Result;

/// Builds a callable copy of the instructions at `source`.
///
/// The stub holds `stolen` (the original bytes at `source`) followed by a `jmp` back to the first
/// instruction after them, so calling the stub behaves like calling the unpatched code.
///
/// The bytes are copied verbatim. They must not contain relative branches or rip-relative
/// operands, since no relocation is performed.
pub fn trampoline(source: usize, stolen: &[u8]) -> Result<ExecutableMemory> {
    let mut stub = allocate_near(source, stolen.len() + REL32_LEN)?;
    let resume = source + stolen.len();
    let at = stub.as_ptr() as usize + stolen.len();
    let back = branch_rel32(JMP_REL32, at, resume).ok_or(AllocError::OutOfMemory { origin: source })?;

    stub[..stolen.len()].copy_from_slice(stolen);
    stub[stolen.len()..].copy_from_slice(&back);
    tracing::debug!(
        source = format_args!("{source:#x}"),
        stub = format_args!("{:#x}", stub.as_ptr() as usize),
        len = stolen.len(),
        "built trampoline"
    );
    Ok(stub)
}

/// Builds a stub near `source` that jumps to `target` from anywhere in the address space.
///
/// Used when `target` is out of rel32 range of `source`.
#[cfg(target_arch = "x86_64")]
pub fn relay(source: usize, target: usize) -> Result<ExecutableMemory> {
    use crate::code::x64::{jmp_abs, JMP_ABS_LEN};

    let mut stub = allocate_near(source, JMP_ABS_LEN)?;
    stub.copy_from_slice(&jmp_abs(target));
    tracing::debug!(
        source = format_args!("{source:#x}"),
        target = format_args!("{target:#x}"),
        stub = format_args!("{:#x}", stub.as_ptr() as usize),
        "built relay"
    );
    Ok(stub)
}

/// On hosts where every target is within rel32 range, no relay is ever needed
#[cfg(not(target_arch = "x86_64"))]
pub fn relay(source: usize, _target: usize) -> Result<ExecutableMemory> {
    Err(AllocError::OutOfMemory { origin: source }.into())
}

#[cfg(test)]
mod tests {
    use crate::code::{branch_target, JMP_REL32, REL32_LEN};

    use super::trampoline;

    #[test]
    /// The stub replays the stolen bytes, then jumps right after them
    fn test_trampoline_layout() {
        // push ebp; mov ebp, esp; sub esp, 0x800
        let original: Box<[u8]> = Box::new([0x55, 0x8B, 0xEC, 0x81, 0xEC, 0x00, 0x08, 0x00, 0x00, 0xCC]);
        let source = original.as_ptr() as usize;
        let stolen = &original[..9];

        let stub = trampoline(source, stolen).unwrap();
        assert_eq!(stub.len(), 9 + REL32_LEN);
        assert_eq!(&stub[..9], stolen);
        assert_eq!(stub[9], JMP_REL32);

        let at = stub.as_ptr() as usize + 9;
        let jmp: [u8; REL32_LEN] = stub[9..].try_into().unwrap();
        assert_eq!(branch_target(at, &jmp), source + 9);
    }

    #[cfg(target_arch = "x86_64")]
    #[test]
    fn test_relay() {
        use crate::code::x64::jmp_abs;

        let anchor = Box::new(0u8);
        let source = &*anchor as *const u8 as usize;
        let stub = super::relay(source, 0x7FFF_0000_1000).unwrap();
        assert_eq!(stub[..], jmp_abs(0x7FFF_0000_1000)[..]);
    }
}
