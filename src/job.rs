use super::*;

/// Worker lanes. Lane 0 scans the lower nonce half, lane 1 the upper.
pub const LANES: usize = 2;

const HALF_MASK: u32 = 0x7fff_ffff;

/// Half of the u32 nonce space, scanned from a random offset and wrapping
/// at the half boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NonceRange {
    base: u32,
    offset: u32,
}

impl NonceRange {
    pub fn new(base: u32, offset: u32) -> Self {
        Self {
            base: base & !HALF_MASK,
            offset: offset & HALF_MASK,
        }
    }

    /// The nonce scanned at `step`; steps beyond the half's size wrap back
    /// to its start.
    pub fn nonce_at(&self, step: u32) -> u32 {
        self.base | (self.offset.wrapping_add(step) & HALF_MASK)
    }

    pub fn contains(&self, nonce: u32) -> bool {
        nonce & !HALF_MASK == self.base
    }
}

/// One published header template. Immutable once on the board; the nonce is
/// the only field workers vary, and they do that in their local copies.
#[derive(Debug, Clone)]
pub struct Job {
    pub job_id: String,
    pub header: [u8; 80],
    pub block_target: Target,
    pub extranonce2: Extranonce,
    pub ntime: Ntime,
    pub ranges: [NonceRange; LANES],
}

impl Job {
    /// Materialises a `mining.notify` into a header template: coinbase
    /// assembly, merkle fold, consensus header layout, fresh random
    /// extranonce2 and per-lane nonce offsets.
    pub fn assemble(
        notify: &Notify,
        extranonce1: &Extranonce,
        extranonce2: Extranonce,
    ) -> Result<Self, InternalError> {
        let coinbase_hash = coinbase_hash(&notify.coinb1, &notify.coinb2, extranonce1, &extranonce2)?;
        let merkle_root = fold_branches(coinbase_hash, &notify.merkle_branches);

        let mut header = [0u8; 80];
        header[..4].copy_from_slice(&notify.version.to_consensus().to_le_bytes());
        header[4..36].copy_from_slice(&notify.prevhash.to_header_bytes());
        header[36..68].copy_from_slice(&merkle_root);
        header[68..72].copy_from_slice(&u32::from(notify.ntime).to_le_bytes());
        header[72..76].copy_from_slice(&notify.nbits.bits().to_le_bytes());

        let offset = rand::rng().random::<u32>();

        Ok(Self {
            job_id: notify.job_id.clone(),
            header,
            block_target: notify.nbits.to_target(),
            extranonce2,
            ntime: notify.ntime,
            ranges: [
                NonceRange::new(0x0000_0000, offset),
                NonceRange::new(0x8000_0000, offset),
            ],
        })
    }
}

/// Double-SHA of `coinb1 || extranonce1 || extranonce2 || coinb2`. The
/// digest is used as-is; no reversal here or anywhere in the merkle fold.
fn coinbase_hash(
    coinb1: &str,
    coinb2: &str,
    extranonce1: &Extranonce,
    extranonce2: &Extranonce,
) -> Result<[u8; 32], InternalError> {
    let mut coinbase =
        hex::decode(coinb1).map_err(|source| InternalError::HexParse { source })?;
    coinbase.extend_from_slice(extranonce1.as_bytes());
    coinbase.extend_from_slice(extranonce2.as_bytes());
    coinbase.extend(hex::decode(coinb2).map_err(|source| InternalError::HexParse { source })?);

    if coinbase.len() > COINBASE_MAX_SIZE {
        return Err(InternalError::InvalidLength {
            expected: COINBASE_MAX_SIZE,
            actual: coinbase.len(),
        });
    }

    Ok(sha256d(&coinbase))
}

/// h(0) = coinbase hash; h(i+1) = sha256d(h(i) || branch(i)), branches in
/// the order received. Zero branches leaves the coinbase hash as the root.
fn fold_branches(coinbase_hash: [u8; 32], branches: &[MerkleNode]) -> [u8; 32] {
    let mut root = coinbase_hash;

    for branch in branches {
        let mut pair = [0u8; 64];
        pair[..32].copy_from_slice(&root);
        pair[32..].copy_from_slice(branch.as_byte_array());
        root = sha256d(&pair);
    }

    root
}

/// The single-writer, multi-reader cell holding the current job. The writer
/// stores the new snapshot, then bumps the version with release ordering;
/// readers pair acquire loads of the version around the copy and retry if it
/// moved. Workers poll the version to notice new work.
#[derive(Debug, Default)]
pub struct JobBoard {
    version: AtomicU64,
    slot: RwLock<Option<Arc<Job>>>,
}

impl JobBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    /// Replaces any prior job. Every notify preempts: workers abandon
    /// in-flight nonces as soon as they observe the new version.
    pub fn publish(&self, job: Job) {
        *self.slot.write() = Some(Arc::new(job));
        self.version.fetch_add(1, Ordering::Release);
    }

    /// A consistent (version, job) pair.
    pub fn snapshot(&self) -> (u64, Option<Arc<Job>>) {
        loop {
            let before = self.version();
            let job = self.slot.read().clone();
            if self.version() == before {
                return (before, job);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notify() -> Notify {
        serde_json::from_value(json!([
            "j1",
            "4d16b6f85af6e2198f44ae2a6de67f78487ae5611b77c6c0440b921e00000000",
            "01000000010000000000000000000000000000000000000000000000000000000000000000ffffffff20020862062f503253482f04b8864e5008",
            "072f736c7573682f000000000100f2052a010000001976a914d23fcdf86f7e756a64a7a9688ef9903327048ed988ac00000000",
            [],
            "20000000",
            "1d00ffff",
            "504e86b9",
            true
        ]))
        .unwrap()
    }

    fn extranonce1() -> Extranonce {
        "a1b2c3d4".parse().unwrap()
    }

    #[test]
    fn zero_branches_root_is_coinbase_hash() {
        let notify = notify();
        let extranonce2 = Extranonce::from_value(7, 4);
        let job = Job::assemble(&notify, &extranonce1(), extranonce2.clone()).unwrap();

        let coinbase = hex::decode(format!(
            "{}{}{}{}",
            notify.coinb1,
            extranonce1(),
            extranonce2,
            notify.coinb2,
        ))
        .unwrap();

        assert_eq!(&job.header[36..68], &sha256d(&coinbase));
    }

    #[test]
    fn branch_fold_matches_manual_hashing() {
        let mut notify = notify();
        let branch: MerkleNode = "c0f65e3443b9e2215ebd08cd6fc52d0e776897a3afdf4787cf28de48d9a8c3ad"
            .parse()
            .unwrap();
        notify.merkle_branches = vec![branch, branch];

        let extranonce2 = Extranonce::zeros(4);
        let job = Job::assemble(&notify, &extranonce1(), extranonce2.clone()).unwrap();

        let coinbase = hex::decode(format!(
            "{}{}{}{}",
            notify.coinb1,
            extranonce1(),
            extranonce2,
            notify.coinb2,
        ))
        .unwrap();

        let mut want = sha256d(&coinbase);
        for _ in 0..2 {
            let mut pair = [0u8; 64];
            pair[..32].copy_from_slice(&want);
            pair[32..].copy_from_slice(branch.as_byte_array());
            want = sha256d(&pair);
        }

        assert_eq!(&job.header[36..68], &want);
    }

    #[test]
    fn header_layout_is_consensus_order() {
        let job = Job::assemble(&notify(), &extranonce1(), Extranonce::zeros(4)).unwrap();

        // version 0x20000000 little-endian
        assert_eq!(&job.header[..4], &[0x00, 0x00, 0x00, 0x20]);
        // first prevhash word 4d16b6f8, byte-swapped
        assert_eq!(&job.header[4..8], &[0xf8, 0xb6, 0x16, 0x4d]);
        // ntime 0x504e86b9 little-endian
        assert_eq!(&job.header[68..72], &[0xb9, 0x86, 0x4e, 0x50]);
        // nbits 0x1d00ffff little-endian
        assert_eq!(&job.header[72..76], &[0xff, 0xff, 0x00, 0x1d]);
        // nonce zeroed until scanning
        assert_eq!(&job.header[76..80], &[0x00; 4]);

        assert_eq!(job.block_target, Target::difficulty_one());
    }

    #[test]
    fn oversize_coinbase_is_rejected() {
        let mut notify = notify();
        notify.coinb1 = "00".repeat(COINBASE_MAX_SIZE);

        let err = Job::assemble(&notify, &extranonce1(), Extranonce::zeros(4)).unwrap_err();
        assert!(matches!(err, InternalError::InvalidLength { .. }));
    }

    #[test]
    fn lanes_are_disjoint_halves() {
        let job = Job::assemble(&notify(), &extranonce1(), Extranonce::zeros(4)).unwrap();

        for step in [0u32, 1, 1000, HALF_MASK] {
            let low = job.ranges[0].nonce_at(step);
            let high = job.ranges[1].nonce_at(step);

            assert!(low < 0x8000_0000);
            assert!(high >= 0x8000_0000);
            assert!(job.ranges[0].contains(low));
            assert!(job.ranges[1].contains(high));
        }
    }

    #[test]
    fn range_wraps_at_half_boundary() {
        let range = NonceRange::new(0x8000_0000, HALF_MASK - 1);

        assert_eq!(range.nonce_at(0), 0xffff_fffe);
        assert_eq!(range.nonce_at(1), 0xffff_ffff);
        assert_eq!(range.nonce_at(2), 0x8000_0000, "wraps within its half");
    }

    #[test]
    fn board_version_advances_per_publish() {
        let board = JobBoard::new();
        assert_eq!(board.version(), 0);
        assert!(board.snapshot().1.is_none());

        board.publish(Job::assemble(&notify(), &extranonce1(), Extranonce::zeros(4)).unwrap());
        let (v1, job1) = board.snapshot();
        assert_eq!(v1, 1);
        assert_eq!(job1.unwrap().job_id, "j1");

        let mut second = notify();
        second.job_id = "j2".into();
        board.publish(Job::assemble(&second, &extranonce1(), Extranonce::zeros(4)).unwrap());

        let (v2, job2) = board.snapshot();
        assert_eq!(v2, 2);
        assert_eq!(job2.unwrap().job_id, "j2", "notify replaces prior job");
    }
}
