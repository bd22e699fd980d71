use super::*;

/// Counters for everything the miner has done since start. Workers batch
/// their hash counts in; everything else is written by the stratum task.
#[derive(Debug)]
pub struct Stats {
    hashes: AtomicU64,
    templates: AtomicU64,
    shares_sent: AtomicU64,
    shares_accepted: AtomicU64,
    shares_rejected: AtomicU64,
    submissions_dropped: AtomicU64,
    matches32: AtomicU64,
    full_blocks: AtomicU64,
    best_difficulty: AtomicU64,
    last_latency_ms: AtomicU64,
    ema_latency_ms: AtomicU64,
    started: Instant,
}

impl Stats {
    pub fn new() -> Self {
        Self {
            hashes: AtomicU64::new(0),
            templates: AtomicU64::new(0),
            shares_sent: AtomicU64::new(0),
            shares_accepted: AtomicU64::new(0),
            shares_rejected: AtomicU64::new(0),
            submissions_dropped: AtomicU64::new(0),
            matches32: AtomicU64::new(0),
            full_blocks: AtomicU64::new(0),
            best_difficulty: AtomicU64::new(0f64.to_bits()),
            last_latency_ms: AtomicU64::new(0),
            ema_latency_ms: AtomicU64::new(0),
            started: Instant::now(),
        }
    }

    pub fn add_hashes(&self, hashes: u64) {
        self.hashes.fetch_add(hashes, Ordering::Relaxed);
    }

    pub fn record_template(&self) {
        self.templates.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sent(&self) {
        self.shares_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_accepted(&self) {
        self.shares_accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.shares_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.submissions_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_match32(&self) {
        self.matches32.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_full_block(&self) {
        self.full_blocks.fetch_add(1, Ordering::Relaxed);
    }

    /// Monotonic high-watermark; NaN and infinity never displace a real
    /// value.
    pub fn record_best_difficulty(&self, difficulty: f64) {
        if difficulty.is_nan() || difficulty.is_infinite() {
            return;
        }

        let mut current = self.best_difficulty.load(Ordering::Relaxed);
        while difficulty > f64::from_bits(current) {
            match self.best_difficulty.compare_exchange_weak(
                current,
                difficulty.to_bits(),
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(observed) => current = observed,
            }
        }
    }

    /// last := latency; ema := latency on first sample, then (ema*9 + l)/10.
    pub fn record_latency(&self, latency: Duration) {
        let latency = latency.as_millis() as u64;
        self.last_latency_ms.store(latency, Ordering::Relaxed);

        let ema = self.ema_latency_ms.load(Ordering::Relaxed);
        let next = if ema == 0 {
            latency
        } else {
            (ema * 9 + latency) / 10
        };
        self.ema_latency_ms.store(next, Ordering::Relaxed);
    }

    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn snapshot(&self) -> StatsView {
        let hashes = self.hashes.load(Ordering::Relaxed);
        let uptime_secs = self.uptime().as_secs_f64();

        StatsView {
            hashes,
            templates: self.templates.load(Ordering::Relaxed),
            shares_sent: self.shares_sent.load(Ordering::Relaxed),
            shares_accepted: self.shares_accepted.load(Ordering::Relaxed),
            shares_rejected: self.shares_rejected.load(Ordering::Relaxed),
            submissions_dropped: self.submissions_dropped.load(Ordering::Relaxed),
            matches32: self.matches32.load(Ordering::Relaxed),
            full_blocks: self.full_blocks.load(Ordering::Relaxed),
            best_difficulty: f64::from_bits(self.best_difficulty.load(Ordering::Relaxed)),
            last_latency_ms: self.last_latency_ms.load(Ordering::Relaxed),
            ema_latency_ms: self.ema_latency_ms.load(Ordering::Relaxed),
            uptime_secs: uptime_secs as u64,
            hashrate: if uptime_secs > 0.0 {
                hashes as f64 / uptime_secs
            } else {
                0.0
            },
        }
    }
}

impl Default for Stats {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time view of [`Stats`], safe to hand out across the API
/// boundary.
#[derive(Debug, Clone, Serialize)]
pub struct StatsView {
    pub hashes: u64,
    pub templates: u64,
    pub shares_sent: u64,
    pub shares_accepted: u64,
    pub shares_rejected: u64,
    pub submissions_dropped: u64,
    pub matches32: u64,
    pub full_blocks: u64,
    pub best_difficulty: f64,
    pub last_latency_ms: u64,
    pub ema_latency_ms: u64,
    pub uptime_secs: u64,
    pub hashrate: f64,
}

impl Display for StatsView {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "hashrate={}  shares={}/{}  best={:.4}  latency={}ms  uptime={}s",
            HashRate(self.hashrate),
            self.shares_accepted,
            self.shares_sent,
            self.best_difficulty,
            self.ema_latency_ms,
            self.uptime_secs,
        )
    }
}

#[derive(Debug)]
pub struct HashRate(pub f64);

impl Display for HashRate {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let rate = self.0;

        if rate >= 1_000_000_000_000.0 {
            write!(f, "{:.2} TH/s", rate / 1_000_000_000_000.0)
        } else if rate >= 1_000_000_000.0 {
            write!(f, "{:.2} GH/s", rate / 1_000_000_000.0)
        } else if rate >= 1_000_000.0 {
            write!(f, "{:.2} MH/s", rate / 1_000_000.0)
        } else if rate >= 1_000.0 {
            write!(f, "{:.2} KH/s", rate / 1_000.0)
        } else {
            write!(f, "{:.2} H/s", rate)
        }
    }
}
