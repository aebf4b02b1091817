//! The in-flight request table.
//!
//! Requests are keyed by their 6-bit sequence number and command; each
//! entry keeps the exact datagram that was sent so a retry puts the
//! identical bytes back on the wire.

/// A request waiting for its response.
#[derive(Debug, Clone)]
pub(crate) struct InFlightRequest {
    pub seq: u8,
    pub netfn: u8,
    /// The command a response will currently carry; `SEND_MESSAGE_CMD`
    /// while the request is still wrapped.
    pub cmd: u8,
    /// The command of the innermost (target) request.
    pub target_cmd: u8,
    /// Remaining Send Message wrappers around the response.
    pub bridging_level: u8,
    /// The datagram as it went on the wire, retained for
    /// retransmission.
    pub wire: Vec<u8>,
}

/// The sequence allocator and in-flight table of one session.
#[derive(Debug, Default)]
pub(crate) struct RequestTracker {
    entries: Vec<InFlightRequest>,
    current_seq: u8,
}

impl RequestTracker {
    /// Allocate the next request sequence number.
    ///
    /// Sequence numbers occupy 6 bits and wrap; an in-flight entry with
    /// the same (seq, cmd) key is superseded on insert.
    pub fn next_seq(&mut self) -> u8 {
        self.current_seq = (self.current_seq + 1) & 0x3F;
        self.current_seq
    }

    /// Insert `entry`, superseding any entry with the same key.
    pub fn insert(&mut self, entry: InFlightRequest) {
        self.entries
            .retain(|e| !(e.seq == entry.seq && e.cmd == entry.cmd));
        self.entries.push(entry);
    }

    /// Find the in-flight entry matching a response.
    pub fn get_mut(&mut self, seq: u8, cmd: u8) -> Option<&mut InFlightRequest> {
        self.entries
            .iter_mut()
            .find(|e| e.seq == seq && e.cmd == cmd)
    }

    /// Remove and return the entry matching (seq, cmd).
    pub fn remove(&mut self, seq: u8, cmd: u8) -> Option<InFlightRequest> {
        let position = self.entries.iter().position(|e| e.seq == seq && e.cmd == cmd)?;
        Some(self.entries.remove(position))
    }

    /// Remove every entry allocated under `seq`, whatever command it
    /// currently expects.
    pub fn remove_seq(&mut self, seq: u8) {
        self.entries.retain(|e| e.seq != seq);
    }

    /// Drop every in-flight entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(seq: u8, cmd: u8) -> InFlightRequest {
        InFlightRequest {
            seq,
            netfn: 0x06,
            cmd,
            target_cmd: cmd,
            bridging_level: 0,
            wire: vec![seq, cmd],
        }
    }

    #[test]
    fn sequence_wraps_at_64() {
        let mut tracker = RequestTracker::default();

        // The first allocated sequence number is 1; 63 allocations
        // later the counter reaches 0 again.
        assert_eq!(tracker.next_seq(), 1);

        for _ in 0..62 {
            tracker.next_seq();
        }

        assert_eq!(tracker.next_seq(), 0);
        assert_eq!(tracker.next_seq(), 1);
    }

    #[test]
    fn at_most_one_entry_per_key() {
        let mut tracker = RequestTracker::default();

        tracker.insert(entry(1, 0x01));
        tracker.insert(InFlightRequest {
            wire: vec![0xFF],
            ..entry(1, 0x01)
        });

        let found = tracker.remove(1, 0x01).unwrap();
        assert_eq!(found.wire, [0xFF]);
        assert!(tracker.remove(1, 0x01).is_none());
    }

    #[test]
    fn lookup_is_keyed_by_seq_and_cmd() {
        let mut tracker = RequestTracker::default();

        tracker.insert(entry(1, 0x01));
        tracker.insert(entry(1, 0x02));
        tracker.insert(entry(2, 0x01));

        assert!(tracker.get_mut(1, 0x02).is_some());
        assert!(tracker.get_mut(2, 0x02).is_none());

        tracker.clear();
        assert!(tracker.get_mut(1, 0x01).is_none());
    }
}
