//! Per-activation bookkeeping of reported peers

use crate::radio::PeerHandle;
use parking_lot::Mutex;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupState {
    /// A report for this peer is in flight
    Pending,
    /// The peer was reported successfully during this activation
    Processed,
}

#[derive(Debug, Default)]
struct DedupInner {
    activation: u64,
    entries: HashMap<PeerHandle, DedupState>,
}

/// Tracks which peers were already reported within one scan activation.
///
/// Every mutation is tagged with the activation it belongs to; calls carrying
/// an older activation are ignored, so completions that arrive after the
/// scanner was stopped cannot leak into the next activation.
#[derive(Debug, Default)]
pub struct DedupSet {
    inner: Mutex<DedupInner>,
}

impl DedupSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current activation generation
    pub fn activation(&self) -> u64 {
        self.inner.lock().activation
    }

    /// Clear all entries and begin a new activation
    pub fn reset(&self) -> u64 {
        let mut inner = self.inner.lock();
        inner.activation += 1;
        inner.entries.clear();
        inner.activation
    }

    pub fn state(&self, peer: &PeerHandle) -> Option<DedupState> {
        self.inner.lock().entries.get(peer).copied()
    }

    pub fn is_processed(&self, peer: &PeerHandle) -> bool {
        self.state(peer) == Some(DedupState::Processed)
    }

    /// Claim the peer for a report. Fails if it is pending, processed, or the
    /// activation is stale.
    pub fn try_begin(&self, peer: &PeerHandle, activation: u64) -> bool {
        let mut inner = self.inner.lock();
        if inner.activation != activation || inner.entries.contains_key(peer) {
            return false;
        }
        inner.entries.insert(peer.clone(), DedupState::Pending);
        true
    }

    /// Record a successful report
    pub fn mark_processed(&self, peer: &PeerHandle, activation: u64) -> bool {
        let mut inner = self.inner.lock();
        if inner.activation != activation {
            return false;
        }
        inner.entries.insert(peer.clone(), DedupState::Processed);
        true
    }

    /// Drop a pending claim so a later discovery can retry the report
    pub fn release(&self, peer: &PeerHandle, activation: u64) -> bool {
        let mut inner = self.inner.lock();
        if inner.activation != activation {
            return false;
        }
        match inner.entries.get(peer) {
            Some(DedupState::Pending) => {
                inner.entries.remove(peer);
                true
            }
            _ => false,
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
