use {super::*, crate::miner::Shared};

/// Digest's top 32 bits were zero; diagnostic only.
pub(crate) const TOP32_ZERO: u32 = 1 << 0;

/// Digest met the block target, not just the pool target.
pub(crate) const FULL_BLOCK: u32 = 1 << 1;

/// Hashes between stop/version polls and hash-counter flushes.
const HASHES_PER_POLL: u32 = 4096;

/// Polls between explicit scheduler yields (~256K hashes).
const POLLS_PER_YIELD: u32 = 64;

/// A digest that cleared the pool target, queued for submission. Everything
/// the submitter needs is captured by value so the worker never blocks.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ShareCandidate {
    pub(crate) job_id: String,
    pub(crate) extranonce2: Extranonce,
    pub(crate) ntime: Ntime,
    pub(crate) nonce: Nonce,
    pub(crate) flags: u32,
    pub(crate) difficulty: f64,
}

/// The hash pump for one lane. Scans its nonce half until the job version
/// moves, the pool target is met, or the miner stops. No failure path.
pub(crate) fn run(lane: usize, shared: Arc<Shared>, submit_tx: mpsc::Sender<ShareCandidate>) {
    let mut seen_version = 0u64;
    let mut job: Option<Arc<Job>> = None;
    let mut midstate = None;
    let mut step = 0u32;
    let mut polls = 0u32;

    info!("Worker {lane} started");

    loop {
        if shared.stop.is_cancelled() {
            info!("Worker {lane} stopping");
            return;
        }

        if shared.board.version() != seen_version {
            let (version, snapshot) = shared.board.snapshot();
            seen_version = version;
            midstate = snapshot.as_ref().map(|job| Midstate::new(&job.header));
            job = snapshot;
            step = 0;
        }

        let (Some(job), Some(midstate)) = (&job, &midstate) else {
            thread::sleep(Duration::from_millis(100));
            continue;
        };

        let range = job.ranges[lane.min(LANES - 1)];

        for _ in 0..HASHES_PER_POLL {
            let nonce = range.nonce_at(step);
            step = step.wrapping_add(1);

            let (digest, early_pass) = midstate.mine(nonce);

            if !early_pass {
                continue;
            }

            let pool_target = *shared.pool_target.read();
            if !pool_target.is_met_by(&digest) {
                continue;
            }

            let mut flags = 0;

            if digest[28..32] == [0, 0, 0, 0] {
                flags |= TOP32_ZERO;
                shared.stats.record_match32();
            }

            if job.block_target.is_met_by(&digest) {
                flags |= FULL_BLOCK;
                shared.stats.record_full_block();
                info!("Worker {lane} found a full block solution");
            }

            let difficulty = target::share_difficulty(&digest);
            shared.stats.record_best_difficulty(difficulty);

            info!(
                "Worker {lane} share: job={} nonce={} difficulty={:.4}",
                job.job_id,
                Nonce::from(nonce),
                difficulty,
            );

            let candidate = ShareCandidate {
                job_id: job.job_id.clone(),
                extranonce2: job.extranonce2.clone(),
                ntime: job.ntime,
                nonce: nonce.into(),
                flags,
                difficulty,
            };

            if submit_tx.try_send(candidate).is_err() {
                shared.stats.record_dropped();
                warn!("Submission queue full, dropping share from worker {lane}");
            }
        }

        shared.stats.add_hashes(HASHES_PER_POLL.into());

        polls += 1;
        if polls % POLLS_PER_YIELD == 0 {
            thread::yield_now();
        }
    }
}
