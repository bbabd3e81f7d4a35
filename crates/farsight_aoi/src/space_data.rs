//! Sequenced space-global data entries.
//!
//! Space data is broadcast state every client in a space eventually needs
//! (time of day, loaded geometry mappings and the like). Entries carry a
//! monotonic sequence number; each witness remembers the last sequence it
//! streamed and sends only newer entries.

/// One broadcast entry.
#[derive(Debug, Clone, PartialEq)]
pub struct SpaceDataEntry {
    pub seq: u32,
    pub space_id: u32,
    pub key: u16,
    pub data: Vec<u8>,
}

/// Ordered log of space data for one space.
#[derive(Debug, Default)]
pub struct SpaceDataStore {
    entries: Vec<SpaceDataEntry>,
    next_seq: u32,
}

impl SpaceDataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an entry and returns its sequence number.
    pub fn add(&mut self, space_id: u32, key: u16, data: Vec<u8>) -> u32 {
        self.next_seq += 1;
        let seq = self.next_seq;
        self.entries.push(SpaceDataEntry {
            seq,
            space_id,
            key,
            data,
        });
        seq
    }

    /// Entries strictly newer than `after`.
    pub fn since(&self, after: u32) -> impl Iterator<Item = &SpaceDataEntry> {
        self.entries.iter().filter(move |e| e.seq > after)
    }

    /// Highest sequence number issued so far.
    pub fn latest_seq(&self) -> u32 {
        self.next_seq
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops entries at or below `seq`; they are assumed delivered to every
    /// interested witness.
    pub fn prune(&mut self, seq: u32) {
        self.entries.retain(|e| e.seq > seq);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequencing_and_since() {
        let mut store = SpaceDataStore::new();
        let a = store.add(1, 10, vec![1]);
        let b = store.add(1, 11, vec![2]);
        assert!(a < b);

        let newer: Vec<u32> = store.since(a).map(|e| e.seq).collect();
        assert_eq!(newer, vec![b]);
        assert_eq!(store.since(b).count(), 0);
    }

    #[test]
    fn test_prune() {
        let mut store = SpaceDataStore::new();
        let a = store.add(1, 10, vec![]);
        store.add(1, 11, vec![]);
        store.prune(a);
        assert_eq!(store.since(0).count(), 1);
        assert_eq!(store.latest_seq(), 2);
    }
}
