//! # Patch set
//!
//! A named, ordered group of patches and hooks enabled and disabled as one unit

use std::collections::HashSet;
use std::ops::Range;

use super::Patch;
use crate::code::REL32_LEN;
use crate::error::{Error, Result};
use crate::hook::Hook;

/// Named, atomically enable/disable-able group of patches and hooks
#[derive(Debug, Clone)]
pub struct PatchSet {
    /// Name, unique across the process
    name: String,
    /// Applied first, in order
    patches: Vec<Patch>,
    /// Applied after every patch, in order
    hooks: Vec<Hook>,
}

/// Borrowed view of one item of a set
#[derive(Debug, Clone, Copy)]
pub enum Item<'a> {
    /// A byte patch
    Patch(&'a Patch),
    /// A call/jmp hook
    Hook(&'a Hook),
}

impl<'a> Item<'a> {
    /// Name of the item
    pub fn name(&self) -> &'a str {
        match self {
            Self::Patch(p) => p.name(),
            Self::Hook(h) => h.name(),
        }
    }

    /// Addresses the item owns
    pub fn footprint(&self) -> Range<usize> {
        match self {
            Self::Patch(p) => p.range(),
            Self::Hook(h) => h.footprint(),
        }
    }

    /// Returns false if the item's bytes would run past the end of the address space
    pub fn fits(&self) -> bool {
        let (start, len) = match self {
            Self::Patch(p) => (p.address(), p.payload().len()),
            Self::Hook(h) => (h.source(), h.stolen().max(REL32_LEN)),
        };
        start.checked_add(len).is_some()
    }
}

impl PatchSet {
    /// Creates a set from its patches and hooks
    pub fn new(name: impl Into<String>, patches: Vec<Patch>, hooks: Vec<Hook>) -> Self {
        Self {
            name: name.into(),
            patches,
            hooks,
        }
    }

    /// Name of the set
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Patches in application order
    pub fn patches(&self) -> &[Patch] {
        &self.patches
    }

    /// Hooks in application order
    pub fn hooks(&self) -> &[Hook] {
        &self.hooks
    }

    /// Every item, patches first
    pub fn items(&self) -> impl Iterator<Item = Item<'_>> {
        self.patches
            .iter()
            .map(Item::Patch)
            .chain(self.hooks.iter().map(Item::Hook))
    }

    /// Checks the set on its own, without looking at memory or other sets.
    ///
    /// Names must be unique across patches and hooks, payloads non-empty, hooks well formed, and
    /// no two items may own overlapping addresses.
    pub fn validate(&self) -> Result<()> {
        let mut names = HashSet::new();
        for item in self.items() {
            if !names.insert(item.name()) {
                return Err(Error::DuplicateName {
                    set: self.name.clone(),
                    item: Some(item.name().to_owned()),
                });
            }
        }

        for patch in &self.patches {
            if patch.payload().is_empty() {
                return Err(Error::EmptyPayload {
                    set: self.name.clone(),
                    item: patch.name().to_owned(),
                });
            }
        }

        for hook in &self.hooks {
            if let Some(reason) = hook.defect() {
                return Err(Error::InvalidHook {
                    set: self.name.clone(),
                    item: hook.name().to_owned(),
                    reason,
                });
            }
        }

        if let Some(item) = self.items().find(|item| !item.fits()) {
            return Err(Error::AddressOverflow {
                set: self.name.clone(),
                item: item.name().to_owned(),
                address: item.footprint().start,
            });
        }

        let items: Vec<_> = self.items().collect();
        for (i, a) in items.iter().enumerate() {
            if let Some(b) = items[i + 1..].iter().find(|b| overlaps(&a.footprint(), &b.footprint())) {
                return Err(Error::PatchConflict {
                    set: self.name.clone(),
                    item: b.name().to_owned(),
                    address: b.footprint().start,
                    other_set: self.name.clone(),
                    other_item: a.name().to_owned(),
                });
            }
        }

        Ok(())
    }
}

/// Returns true if the half-open ranges share at least one address
pub fn overlaps(a: &Range<usize>, b: &Range<usize>) -> bool {
    a.start < b.end && b.start < a.end
}
