use super::*;

/// Difficulty suggested to the pool right after subscribing. Solo pools
/// honour low suggestions, which keeps share cadence sane on CPU hashrates.
pub const DEFAULT_SUGGEST_DIFFICULTY: f64 = 0.001;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolEndpoint {
    pub host: String,
    pub port: u16,
}

impl FromStr for PoolEndpoint {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| anyhow!("pool endpoint `{s}` must be <HOST:PORT>"))?;

        if host.is_empty() {
            bail!("pool endpoint `{s}` has an empty host");
        }

        Ok(Self {
            host: host.into(),
            port: port
                .parse()
                .with_context(|| format!("invalid port in pool endpoint `{s}`"))?,
        })
    }
}

impl Display for PoolEndpoint {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Every timer the stratum state machine runs on. Production values follow
/// the pool-facing conventions; tests tighten them.
#[derive(Debug, Clone, Copy)]
pub struct Tuning {
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub retry_delay: Duration,
    pub failover_threshold: Duration,
    pub probe_interval: Duration,
    pub keepalive_idle: Duration,
    pub inactivity_timeout: Duration,
    pub unconfigured_delay: Duration,
    pub handshake_max_lines: usize,
}

impl Default for Tuning {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(5),
            retry_delay: Duration::from_secs(10),
            failover_threshold: Duration::from_secs(30),
            probe_interval: Duration::from_secs(120),
            keepalive_idle: Duration::from_secs(30),
            inactivity_timeout: Duration::from_secs(700),
            unconfigured_delay: Duration::from_secs(5),
            handshake_max_lines: 10,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Options {
    pub primary: PoolEndpoint,
    pub backup: Option<PoolEndpoint>,
    pub wallet: String,
    pub password: String,
    pub worker_name: Option<String>,
    pub desired_difficulty: f64,
    pub cpu_cores: Option<usize>,
    pub tuning: Tuning,
}

impl Options {
    pub fn new(primary: PoolEndpoint, wallet: impl Into<String>) -> Self {
        Self {
            primary,
            backup: None,
            wallet: wallet.into(),
            password: "x".into(),
            worker_name: None,
            desired_difficulty: DEFAULT_SUGGEST_DIFFICULTY,
            cpu_cores: None,
            tuning: Tuning::default(),
        }
    }

    /// The stratum username: the wallet address, with the worker name
    /// appended as `wallet.worker` when one is configured.
    pub fn username(&self) -> String {
        match &self.worker_name {
            Some(worker) if !worker.is_empty() => format!("{}.{}", self.wallet, worker),
            _ => self.wallet.clone(),
        }
    }
}
