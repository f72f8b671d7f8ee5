//! Bookkeeping for registered sets: their state, their snapshots, and who owns which addresses

use std::collections::HashMap;
use std::mem;
use std::sync::Arc;

use super::apply::Snapshots;
use crate::error::{Error, Result};
use crate::patch::set::overlaps;
use crate::patch::PatchSet;

/// Lifecycle state of a registered set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum State {
    /// Nothing of the set is live
    Disabled,
    /// Every item of the set is live
    Enabled,
    /// An enable or disable is in progress; the snapshots are checked out
    Transitioning,
}

/// One registered set
struct Entry {
    /// The set itself, shared with in-flight transitions
    set: Arc<PatchSet>,
    /// Current state
    state: State,
    /// Snapshots by item name, empty while checked out
    snapshots: Snapshots,
}

/// Every registered set
#[derive(Default)]
pub(crate) struct Registry {
    /// Sets by name
    entries: HashMap<String, Entry>,
    /// Names in registration order
    order: Vec<String>,
}

impl Registry {
    /// Finds an item of another set overlapping an item of `set`
    fn conflict(&self, set: &PatchSet) -> Option<Error> {
        for name in &self.order {
            let other = &self.entries[name].set;
            for item in set.items() {
                if let Some(theirs) = other
                    .items()
                    .find(|theirs| overlaps(&item.footprint(), &theirs.footprint()))
                {
                    return Some(Error::PatchConflict {
                        set: set.name().to_owned(),
                        item: item.name().to_owned(),
                        address: item.footprint().start,
                        other_set: other.name().to_owned(),
                        other_item: theirs.name().to_owned(),
                    });
                }
            }
        }
        None
    }

    /// Adds a disabled set after checking its name and addresses against every registered set
    pub(crate) fn insert(&mut self, set: PatchSet) -> Result<()> {
        if self.entries.contains_key(set.name()) {
            return Err(Error::DuplicateName {
                set: set.name().to_owned(),
                item: None,
            });
        }
        if let Some(conflict) = self.conflict(&set) {
            return Err(conflict);
        }

        let name = set.name().to_owned();
        self.order.push(name.clone());
        self.entries.insert(
            name,
            Entry {
                set: Arc::new(set),
                state: State::Disabled,
                snapshots: Snapshots::new(),
            },
        );
        Ok(())
    }

    /// Starts moving `name` towards `target`.
    ///
    /// Returns `None` if the set is already there, otherwise marks it transitioning and checks out
    /// its snapshots.
    pub(crate) fn begin(
        &mut self,
        name: &str,
        target: State,
    ) -> Result<Option<(Arc<PatchSet>, Snapshots)>> {
        let entry = self
            .entries
            .get_mut(name)
            .ok_or_else(|| Error::NotRegistered(name.to_owned()))?;
        match entry.state {
            State::Transitioning => Err(Error::AlreadyTransitioning(name.to_owned())),
            state if state == target => Ok(None),
            _ => {
                entry.state = State::Transitioning;
                Ok(Some((
                    Arc::clone(&entry.set),
                    mem::take(&mut entry.snapshots),
                )))
            }
        }
    }

    /// Ends a transition started by [`Registry::begin`], checking the snapshots back in
    pub(crate) fn finish(&mut self, name: &str, state: State, snapshots: Snapshots) {
        if let Some(entry) = self.entries.get_mut(name) {
            entry.state = state;
            entry.snapshots = snapshots;
        }
    }

    /// State of a set, if registered
    pub(crate) fn state(&self, name: &str) -> Option<State> {
        self.entries.get(name).map(|entry| entry.state)
    }

    /// Names in registration order
    pub(crate) fn names(&self) -> &[String] {
        &self.order
    }
}
