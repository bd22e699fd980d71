use super::*;

/// Slots in the pending-submission ring.
pub(crate) const PENDING_CAPACITY: usize = 32;

/// A submitted share awaiting its response, keyed by message id.
#[derive(Debug, Clone)]
pub(crate) struct PendingShare {
    pub(crate) msg_id: u32,
    pub(crate) sent_at: Instant,
    pub(crate) job_id: String,
    pub(crate) nonce: Nonce,
    pub(crate) flags: u32,
    pub(crate) difficulty: f64,
}

/// Fixed-capacity ring of in-flight submissions. The write index advances
/// modulo capacity; when the ring is full the oldest entry is overwritten
/// and counted as dropped. At most one occupied slot per msg_id, which the
/// strictly increasing id counter guarantees.
#[derive(Debug)]
pub(crate) struct PendingRing {
    slots: Vec<Option<PendingShare>>,
    next: usize,
    dropped: u64,
}

impl PendingRing {
    pub(crate) fn new() -> Self {
        Self {
            slots: vec![None; PENDING_CAPACITY],
            next: 0,
            dropped: 0,
        }
    }

    /// Stores a share, returning the unmatched entry it evicted when the
    /// ring was full.
    pub(crate) fn record(&mut self, share: PendingShare) -> Option<PendingShare> {
        let evicted = self.slots[self.next].replace(share);
        if evicted.is_some() {
            self.dropped += 1;
        }
        self.next = (self.next + 1) % PENDING_CAPACITY;
        evicted
    }

    pub(crate) fn take(&mut self, msg_id: u32) -> Option<PendingShare> {
        self.slots
            .iter_mut()
            .find(|slot| {
                slot.as_ref()
                    .map(|share| share.msg_id == msg_id)
                    .unwrap_or(false)
            })
            .and_then(Option::take)
    }

    pub(crate) fn clear(&mut self) {
        self.slots.iter_mut().for_each(|slot| *slot = None);
    }

    pub(crate) fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Matches a response to its pending share and updates the counters:
    /// latency into last/EMA, accepted or rejected with the pool's reason
    /// preserved.
    pub(crate) fn settle(
        &mut self,
        stats: &Stats,
        msg_id: u32,
        accepted: bool,
        reason: Option<String>,
    ) {
        let Some(share) = self.take(msg_id) else {
            // suggest_difficulty replies and handshake stragglers land here
            debug!("Unmatched response id={msg_id}");
            return;
        };

        stats.record_latency(share.sent_at.elapsed());

        if accepted {
            stats.record_accepted();
            if share.flags & crate::worker::FULL_BLOCK != 0 {
                info!("Pool accepted a full block solution on job {}", share.job_id);
            }
            info!(
                "Share accepted: job={} nonce={} difficulty={:.4}",
                share.job_id, share.nonce, share.difficulty,
            );
        } else {
            stats.record_rejected();
            warn!(
                "Share rejected: job={} nonce={} reason={}",
                share.job_id,
                share.nonce,
                reason.as_deref().unwrap_or("unknown"),
            );
        }
    }

    #[cfg(test)]
    fn occupied_ids(&self) -> Vec<u32> {
        self.slots
            .iter()
            .flatten()
            .map(|share| share.msg_id)
            .collect()
    }
}
