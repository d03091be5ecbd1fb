use std::collections::hash_map::{self, HashMap};
use std::sync::Arc;

use crate::config::CounterDescriptor;
use crate::error::Error;

/// Where a format id came from.
#[derive(Clone, Debug)]
pub struct Entry {
    pub descriptor: Arc<CounterDescriptor>,
    /// CPU the counter was opened on.
    pub cpu: u32,
    /// Position of the descriptor in the list given to
    /// [`Monitor::open`][crate::monitor::Monitor::open], 0 being the group leader.
    pub index: usize,
}

/// Format id to descriptor mapping of one monitoring session.
///
/// Built once while the counters are opened and read-only afterwards.
#[derive(Clone, Debug, Default)]
pub struct Registry {
    entries: HashMap<u64, Entry>,
}

impl Registry {
    pub(crate) fn insert(&mut self, id: u64, entry: Entry) -> Result<(), Error> {
        match self.entries.entry(id) {
            hash_map::Entry::Occupied(_) => Err(Error::DuplicateId { id }),
            hash_map::Entry::Vacant(slot) => {
                slot.insert(entry);
                Ok(())
            }
        }
    }

    /// Resolves a format id into the descriptor of its counter.
    pub fn get(&self, id: u64) -> Option<&CounterDescriptor> {
        self.entries.get(&id).map(|e| e.descriptor.as_ref())
    }

    pub fn entry(&self, id: u64) -> Option<&Entry> {
        self.entries.get(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u64, &Entry)> {
        self.entries.iter().map(|(id, e)| (*id, e))
    }
}
