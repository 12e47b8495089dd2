use std::collections::BTreeMap;

use super::{AckCallback, Message};

/// Published messages waiting for a publisher confirm, keyed by delivery tag.
#[derive(Default)]
pub(crate) struct PendingConfirms {
    entries: BTreeMap<u64, (Message, AckCallback)>,
}

impl PendingConfirms {
    pub(crate) fn insert(&mut self, tag: u64, message: Message, on_ack: AckCallback) {
        self.entries.insert(tag, (message, on_ack));
    }

    pub(crate) fn remove(&mut self, tag: u64) -> Option<(Message, AckCallback)> {
        self.entries.remove(&tag)
    }

    /// Take everything a confirm for `tag` covers: just `tag`, or every tag up to and
    /// including it when `multiple` is set.
    pub(crate) fn take(&mut self, tag: u64, multiple: bool) -> Vec<(Message, AckCallback)> {
        if !multiple {
            return self.remove(tag).into_iter().collect();
        }
        let rest = self.entries.split_off(&tag.saturating_add(1));
        let covered = std::mem::replace(&mut self.entries, rest);
        covered.into_iter().map(|(_, entry)| entry).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
