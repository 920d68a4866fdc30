//! Rewrite journal
//!
//! Every attribute rewritten during a run gets one entry holding the value
//! it had before the run and the value it should end up with. Rollback
//! replays the originals in reverse; replication replays the new values in
//! order.

use crate::model::{AttributeHandle, AttributeValue};
use std::collections::HashMap;

/// One rewritten attribute
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewriteEntry {
    /// Attribute that was written
    pub handle: AttributeHandle,
    /// Value before the run touched it
    pub original: AttributeValue,
    /// Value the run wants it to hold
    pub new: AttributeValue,
}

/// Ordered, deduplicated record of attribute rewrites
#[derive(Debug, Default)]
pub struct RewriteJournal {
    entries: Vec<RewriteEntry>,
    index: HashMap<AttributeHandle, usize>,
}

impl RewriteJournal {
    /// Empty journal
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a rewrite. A repeated write to the same attribute keeps the
    /// first original and replaces the new value.
    pub fn record(&mut self, handle: AttributeHandle, original: AttributeValue, new: AttributeValue) {
        if let Some(&pos) = self.index.get(&handle) {
            self.entries[pos].new = new;
            return;
        }
        self.index.insert(handle, self.entries.len());
        self.entries.push(RewriteEntry {
            handle,
            original,
            new,
        });
    }

    /// Entries in recorded order
    #[inline]
    #[must_use]
    pub fn entries(&self) -> &[RewriteEntry] {
        &self.entries
    }

    /// Entry for an attribute, if it was rewritten
    #[must_use]
    pub fn get(&self, handle: &AttributeHandle) -> Option<&RewriteEntry> {
        self.index.get(handle).map(|&pos| &self.entries[pos])
    }

    /// Number of rewritten attributes
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing was rewritten
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Take every entry in recorded order, leaving the journal empty
    pub fn drain(&mut self) -> Vec<RewriteEntry> {
        self.index.clear();
        std::mem::take(&mut self.entries)
    }
}
