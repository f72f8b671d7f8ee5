//! Applies and reverts single items against memory, recording snapshots

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use tracing::{info, warn};

use crate::alloc::AllocError;
use crate::code::{branch_rel32, branch_target, rel32, CALL_REL32, REL32_LEN};
use crate::error::{Error, Result};
use crate::hook::{trampoline, Hook, HookKind};
use crate::patch::{Item, Patch};
use crate::patcher::byte::{write_verified, Snapshot};
use crate::patcher::MemoryAccessor;

/// Snapshots of one set, by item name
pub(crate) type Snapshots = HashMap<String, Snapshot>;

/// Writes `bytes` over a snapshotted location. If the write landed but did not verify, the
/// snapshot is written back so nothing is left half-applied.
unsafe fn write_item<M: MemoryAccessor + ?Sized>(
    memory: &M,
    set: &str,
    item: &str,
    snapshot: &Snapshot,
    bytes: &[u8],
) -> Result<()> {
    let result = write_verified(memory, snapshot.address(), bytes);
    if let Err(Error::VerificationFailed { .. }) = result {
        if let Err(error) = snapshot.restore(memory) {
            warn!(
                set,
                item,
                address = format_args!("{:#x}", snapshot.address()),
                %error,
                outcome = "rollback failed",
            );
        }
    }
    result
}

/// Applies `patch`, capturing its snapshot on first application.
///
/// An existing snapshot is never replaced, so re-applying keeps the true baseline.
///
/// # Safety
///
/// The patch's address range must be mapped and safe to overwrite
pub(crate) unsafe fn apply_patch<M: MemoryAccessor + ?Sized>(
    memory: &M,
    set: &str,
    patch: &Patch,
    snapshots: &mut Snapshots,
) -> Result<()> {
    let bytes = patch.payload().bytes();
    if bytes.is_empty() {
        return Err(Error::EmptyPayload {
            set: set.to_owned(),
            item: patch.name().to_owned(),
        });
    }

    let snapshot = match snapshots.entry(patch.name().to_owned()) {
        Entry::Occupied(e) => e.into_mut(),
        Entry::Vacant(e) => {
            let snapshot = Snapshot::capture(memory, patch.address(), bytes.len())?;
            if let Some(expected) = patch.expected() {
                if snapshot.original() != expected {
                    return Err(Error::UnexpectedBytes {
                        set: set.to_owned(),
                        item: patch.name().to_owned(),
                        address: patch.address(),
                        found: snapshot.original().to_vec(),
                    });
                }
            }
            e.insert(snapshot)
        }
    };

    write_item(memory, set, patch.name(), snapshot, &bytes)?;
    info!(
        set,
        item = patch.name(),
        address = format_args!("{:#x}", patch.address()),
        outcome = "applied",
    );
    Ok(())
}

/// Captures a hook's snapshot and prepares everything it branches to: the relay when the target is
/// out of reach, and the detour's original slot.
unsafe fn prepare_hook<M: MemoryAccessor + ?Sized>(memory: &M, hook: &Hook) -> Result<Snapshot> {
    let source = hook.source();
    let footprint = memory.read_vec(source, hook.footprint().len())?;
    let mut snapshot = Snapshot::from_bytes(source, footprint[..REL32_LEN].to_vec());

    if rel32(source, hook.target().address()).is_none() {
        snapshot.redirect_through(trampoline::relay(source, hook.target().address())?);
    }

    if let Some(detour) = hook.detour() {
        let original = match hook.kind() {
            HookKind::Call => {
                let mut instr = [0u8; REL32_LEN];
                instr.copy_from_slice(&footprint[..REL32_LEN]);
                if instr[0] != CALL_REL32 {
                    return Err(Error::UnexpectedOpcode {
                        address: source,
                        expected: CALL_REL32,
                        found: instr[0],
                    });
                }
                branch_target(source, &instr)
            }
            HookKind::Jmp => {
                let stub = trampoline::trampoline(source, &footprint)?;
                let address = stub.as_ptr() as usize;
                snapshot.keep(stub);
                address
            }
        };
        // bound before the branch goes live
        detour.bind(original);
    }

    Ok(snapshot)
}

/// Applies `hook`: computes its branch, then writes it like a patch.
///
/// # Safety
///
/// The hook's footprint must be mapped, and its target must be code with the calling convention of
/// the redirected instruction
pub(crate) unsafe fn apply_hook<M: MemoryAccessor + ?Sized>(
    memory: &M,
    set: &str,
    hook: &Hook,
    snapshots: &mut Snapshots,
) -> Result<()> {
    let snapshot = match snapshots.entry(hook.name().to_owned()) {
        Entry::Occupied(e) => e.into_mut(),
        Entry::Vacant(e) => e.insert(prepare_hook(memory, hook)?),
    };

    let source = hook.source();
    let destination = snapshot.redirect().unwrap_or(hook.target().address());
    let instr = branch_rel32(hook.kind().opcode(), source, destination)
        .ok_or(AllocError::OutOfMemory { origin: source })?;

    write_item(memory, set, hook.name(), snapshot, &instr)?;
    info!(
        set,
        item = hook.name(),
        address = format_args!("{source:#x}"),
        target = format_args!("{destination:#x}"),
        outcome = "applied",
    );
    Ok(())
}

/// Applies any item
///
/// # Safety
///
/// See [`apply_patch`] and [`apply_hook`]
pub(crate) unsafe fn apply<M: MemoryAccessor + ?Sized>(
    memory: &M,
    set: &str,
    item: Item<'_>,
    snapshots: &mut Snapshots,
) -> Result<()> {
    match item {
        Item::Patch(patch) => apply_patch(memory, set, patch, snapshots),
        Item::Hook(hook) => apply_hook(memory, set, hook, snapshots),
    }
}

/// Writes an item's snapshot back
///
/// # Safety
///
/// The caller must ensure that reverting to a pre-patched state is safe for the location; for
/// hooks, no thread may be about to execute the branch being removed
pub(crate) unsafe fn revert<M: MemoryAccessor + ?Sized>(
    memory: &M,
    set: &str,
    item: Item<'_>,
    snapshots: &Snapshots,
) -> Result<()> {
    let snapshot = snapshots.get(item.name()).ok_or_else(|| Error::NoSnapshot {
        set: set.to_owned(),
        item: item.name().to_owned(),
    })?;
    snapshot.restore(memory)?;
    info!(
        set,
        item = item.name(),
        address = format_args!("{:#x}", snapshot.address()),
        outcome = "reverted",
    );
    Ok(())
}
