use crate::Entry;
use crate::Operation;

/// Produces consecutive log entries starting at a given index
pub struct EntryBuilder {
    index: u64,
    term: u64,
}

impl EntryBuilder {
    pub fn new(
        start_index: u64,
        term: u64,
    ) -> Self {
        Self {
            index: start_index,
            term,
        }
    }

    pub fn command(
        &mut self,
        op: &Operation,
    ) -> Entry {
        self.raw(op.encode().unwrap())
    }

    /// Entry with an arbitrary, possibly corrupt, payload
    pub fn raw(
        &mut self,
        payload: Vec<u8>,
    ) -> Entry {
        let entry = Entry {
            index: self.index,
            term: self.term,
            payload,
        };
        self.index += 1;
        entry
    }

    pub fn commands(
        &mut self,
        ops: &[Operation],
    ) -> Vec<Entry> {
        ops.iter().map(|op| self.command(op)).collect()
    }
}
