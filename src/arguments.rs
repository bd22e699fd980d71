use super::*;

#[derive(Debug, Parser)]
#[command(version, about = "Solo Bitcoin miner speaking Stratum v1")]
pub(crate) struct Arguments {
    #[arg(help = "Primary pool <HOST:PORT>.")]
    pool: PoolEndpoint,
    #[arg(long, help = "Backup pool <HOST:PORT>.")]
    backup: Option<PoolEndpoint>,
    #[arg(long, help = "Wallet <ADDRESS> used as the stratum username.")]
    wallet: String,
    #[arg(long, help = "Stratum <PASSWORD>.")]
    password: Option<String>,
    #[arg(long, help = "Worker <NAME> appended to the wallet.")]
    worker: Option<String>,
    #[arg(long, help = "Share <DIFFICULTY> to suggest to the pool.")]
    difficulty: Option<Difficulty>,
    #[arg(long, help = "Number of <CPU_CORES> to use.")]
    cpu_cores: Option<usize>,
    #[arg(long, help = "Seconds between status log lines.", default_value = "30")]
    status_interval: u64,
}

impl Arguments {
    pub(crate) async fn run(self, cancel_token: CancellationToken) -> Result {
        let mut options = Options::new(self.pool, self.wallet);
        options.backup = self.backup;
        options.worker_name = self.worker;
        options.cpu_cores = self.cpu_cores;

        if let Some(password) = self.password {
            options.password = password;
        }

        if let Some(difficulty) = self.difficulty {
            options.desired_difficulty = difficulty.as_f64();
        }

        info!(
            "Mining to {} on {}{}",
            options.username(),
            options.primary,
            options
                .backup
                .as_ref()
                .map(|backup| format!(" (backup {backup})"))
                .unwrap_or_default(),
        );

        let miner = Miner::start(options);
        let status_interval = Duration::from_secs(self.status_interval.max(1));

        loop {
            tokio::select! {
                _ = cancel_token.cancelled() => break,
                _ = sleep(status_interval) => {
                    let stats = miner.snapshot_stats();
                    if miner.is_connected() {
                        info!("{} [{}]", stats, miner.current_pool());
                    } else {
                        info!("{} [disconnected]", stats);
                    }
                }
            }
        }

        miner.stop();

        println!(
            "{}",
            serde_json::to_string_pretty(&miner.snapshot_stats())?
        );

        Ok(())
    }
}
