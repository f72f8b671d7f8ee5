//! # Manager
//!
//! This module covers the patch manager, the registry that owns every [`PatchSet`] and moves it
//! between its disabled and enabled states

mod apply;
mod registry;

use std::sync::{Mutex, MutexGuard, PoisonError};

use lazy_static::lazy_static;
use tracing::{debug, error, info, warn};

use self::apply::Snapshots;
use self::registry::{Registry, State};
use crate::error::{Error, Result};
use crate::patch::PatchSet;
use crate::patcher::mem::ProcessMemory;
use crate::patcher::MemoryAccessor;

lazy_static! {
    /// Process-wide manager over the real address space
    static ref GLOBAL: PatchManager = PatchManager::new(ProcessMemory::new());
}

/// Owns registered patch sets and applies them through a [`MemoryAccessor`].
///
/// The registry lock is only held for bookkeeping. While a set is being enabled or disabled its
/// snapshots are checked out of the registry, so code running during a write (a hook body, another
/// thread) may use the manager for any other set.
pub struct PatchManager<M: MemoryAccessor = ProcessMemory> {
    /// Accessor every write goes through
    memory: M,
    /// Registered sets
    registry: Mutex<Registry>,
}

impl PatchManager {
    /// Manager shared by the whole process, writing to real memory
    pub fn global() -> &'static PatchManager {
        &GLOBAL
    }
}

impl<M: MemoryAccessor> PatchManager<M> {
    /// Creates an empty manager
    pub fn new(memory: M) -> Self {
        Self {
            memory,
            registry: Mutex::new(Registry::default()),
        }
    }

    /// Accessor the manager writes through
    pub fn memory(&self) -> &M {
        &self.memory
    }

    /// Locks the registry. Every transition leaves it consistent, so a poisoned lock is still
    /// usable.
    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers `set` in the disabled state.
    ///
    /// The set is validated on its own and against every registered set. No memory is touched, so
    /// a conflicting set is rejected before any of its bytes could be written.
    pub fn register(&self, set: PatchSet) -> Result<()> {
        let name = set.name().to_owned();
        let len = set.patches().len() + set.hooks().len();
        if let Err(error) = set.validate().and_then(|_| self.registry().insert(set)) {
            match &error {
                Error::PatchConflict {
                    item,
                    address,
                    other_set,
                    other_item,
                    ..
                } => warn!(
                    set = name.as_str(),
                    item = item.as_str(),
                    address = format_args!("{address:#x}"),
                    other_set = other_set.as_str(),
                    other_item = other_item.as_str(),
                    outcome = "conflict",
                ),
                _ => warn!(set = name.as_str(), %error, outcome = "rejected"),
            }
            return Err(error);
        }
        info!(set = name.as_str(), items = len, outcome = "registered");
        Ok(())
    }

    /// Applies every item of a set, patches first, in declaration order.
    ///
    /// If any item fails, the items applied by this call are reverted in reverse order and the set
    /// stays disabled. Enabling an enabled set does nothing.
    ///
    /// # Safety
    ///
    /// Every address of the set must be mapped and safe to overwrite, and every hook target must
    /// be a function compatible with the instruction it replaces
    pub unsafe fn enable(&self, name: &str) -> Result<()> {
        let begun = self.registry().begin(name, State::Enabled)?;
        let Some((set, mut snapshots)) = begun else {
            debug!(set = name, outcome = "already enabled");
            return Ok(());
        };

        let result = self.apply_all(&set, &mut snapshots);
        let state = match result {
            Ok(()) => State::Enabled,
            Err(_) => State::Disabled,
        };
        self.registry().finish(name, state, snapshots);

        if result.is_ok() {
            info!(set = name, outcome = "enabled");
        }
        result
    }

    /// Applies items in order, unwinding this call's work on the first failure
    unsafe fn apply_all(&self, set: &PatchSet, snapshots: &mut Snapshots) -> Result<()> {
        let mut applied = Vec::new();
        for item in set.items() {
            if let Err(err) = apply::apply(&self.memory, set.name(), item, snapshots) {
                error!(
                    set = set.name(),
                    item = item.name(),
                    address = format_args!("{:#x}", item.footprint().start),
                    error = %err,
                    outcome = "failed",
                );
                for done in applied.into_iter().rev() {
                    if let Err(error) = apply::revert(&self.memory, set.name(), done, snapshots) {
                        warn!(
                            set = set.name(),
                            item = done.name(),
                            address = format_args!("{:#x}", done.footprint().start),
                            %error,
                            outcome = "rollback failed",
                        );
                    }
                }
                return Err(err);
            }
            applied.push(item);
        }
        Ok(())
    }

    /// Reverts every item of a set, hooks first, in reverse declaration order.
    ///
    /// Best effort: an item that fails to revert is logged and skipped, and the set always ends up
    /// disabled. Disabling a disabled set does nothing.
    ///
    /// # Safety
    ///
    /// No thread may be about to execute a branch being removed, and reverting each location to
    /// its original bytes must be safe
    pub unsafe fn disable(&self, name: &str) -> Result<()> {
        let begun = self.registry().begin(name, State::Disabled)?;
        let Some((set, snapshots)) = begun else {
            debug!(set = name, outcome = "already disabled");
            return Ok(());
        };

        let items: Vec<_> = set.items().collect();
        for item in items.into_iter().rev() {
            if let Err(error) = apply::revert(&self.memory, set.name(), item, &snapshots) {
                warn!(
                    set = set.name(),
                    item = item.name(),
                    address = format_args!("{:#x}", item.footprint().start),
                    %error,
                    outcome = "revert failed",
                );
            }
        }
        self.registry().finish(name, State::Disabled, snapshots);

        info!(set = name, outcome = "disabled");
        Ok(())
    }

    /// Enables a disabled set or disables an enabled one, returning whether it is now enabled
    ///
    /// # Safety
    ///
    /// See [`PatchManager::enable`] and [`PatchManager::disable`]
    pub unsafe fn toggle(&self, name: &str) -> Result<bool> {
        if self.is_enabled(name) == Some(true) {
            self.disable(name)?;
            Ok(false)
        } else {
            self.enable(name)?;
            Ok(true)
        }
    }

    /// Disables every enabled set, most recently registered first
    ///
    /// # Safety
    ///
    /// See [`PatchManager::disable`]
    pub unsafe fn disable_all(&self) {
        let names = self.set_names();
        for name in names.iter().rev() {
            if let Err(error) = self.disable(name) {
                warn!(set = name.as_str(), %error, outcome = "revert failed");
            }
        }
    }

    /// Whether a set is fully enabled, or `None` if no such set is registered.
    ///
    /// A set in the middle of a transition is reported as not enabled.
    pub fn is_enabled(&self, name: &str) -> Option<bool> {
        self.registry()
            .state(name)
            .map(|state| state == State::Enabled)
    }

    /// Registered set names, in registration order
    pub fn set_names(&self) -> Vec<String> {
        self.registry().names().to_vec()
    }
}
