//! Directional matrix of probe sample records.
//!
//! Two-level map `target -> via -> PingRecord`. The matrix is directional:
//! `(a via b)` and `(b via a)` are independent records. Entries are created
//! lazily on first access, so reads during clustering may materialize
//! zero-sample records; those read as a 0.0 success rate, which is exactly
//! what an unmeasured pair should look like.
//!
//! All access goes through one lock. Mutation of a live record only ever
//! happens from the single probe volley in flight, so readers see at worst
//! a snapshot one sample old.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::peer::PeerId;
use crate::ping_record::PingRecord;

/// `target -> via -> PingRecord`, lazily populated.
pub struct SampleMatrix {
    max_htl: i16,
    records: Mutex<HashMap<PeerId, HashMap<PeerId, PingRecord>>>,
}

impl SampleMatrix {
    pub fn new(max_htl: i16) -> Self {
        Self {
            max_htl,
            records: Mutex::new(HashMap::new()),
        }
    }

    /// Runs `f` against the record for `(target, via)`, creating it first
    /// if this pair has never been touched.
    pub fn with_record<R>(
        &self,
        target: &PeerId,
        via: &PeerId,
        f: impl FnOnce(&mut PingRecord) -> R,
    ) -> R {
        let mut records = self.records.lock();
        let row = records.entry(*target).or_default();
        let record = row
            .entry(*via)
            .or_insert_with(|| PingRecord::new(self.max_htl));
        f(record)
    }

    /// Decayed success rate for `(target, via)`; 0.0 for unmeasured pairs.
    #[must_use]
    pub fn average(&self, target: &PeerId, via: &PeerId) -> f64 {
        self.with_record(target, via, |rec| rec.average())
    }

    /// Removes `peer` everywhere: its whole row as a target, and its
    /// column from every remaining row as a via.
    ///
    /// Callers owning probe state must first settle the race against an
    /// in-flight volley; see the prober's forget path.
    pub fn forget(&self, peer: &PeerId) {
        let mut records = self.records.lock();
        records.remove(peer);
        for row in records.values_mut() {
            row.remove(peer);
        }
    }

    /// Number of targets with at least one record. Test/diagnostic aid.
    #[must_use]
    pub fn target_count(&self) -> usize {
        self.records.lock().len()
    }
}
