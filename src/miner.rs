use {
    super::*,
    crate::stratum::client::{self, ClientConfig, Link},
};

/// State shared between the stratum task, the workers, and the API surface.
/// The job board and pool target are written only by the stratum task;
/// workers read them and push candidates through the submission queue.
#[derive(Debug)]
pub(crate) struct Shared {
    pub(crate) board: JobBoard,
    pub(crate) pool_target: RwLock<Target>,
    pub(crate) stats: Stats,
    pub(crate) connected: AtomicBool,
    pub(crate) current_pool: RwLock<String>,
    pub(crate) stop: CancellationToken,
    pub(crate) reconnect: AtomicBool,
}

impl Shared {
    pub(crate) fn new() -> Self {
        Self {
            board: JobBoard::new(),
            pool_target: RwLock::new(Target::difficulty_one()),
            stats: Stats::new(),
            connected: AtomicBool::new(false),
            current_pool: RwLock::new(String::new()),
            stop: CancellationToken::new(),
            reconnect: AtomicBool::new(false),
        }
    }
}

/// Handle over a running miner: worker threads plus the stratum task.
/// `start` must be called from within a tokio runtime.
pub struct Miner {
    shared: Arc<Shared>,
}

impl Miner {
    pub fn start(options: Options) -> Miner {
        let shared = Arc::new(Shared::new());
        let (submit_tx, submit_rx) = mpsc::channel(SUBMIT_QUEUE_DEPTH);

        let mut system = System::new();
        system.refresh_cpu_all();
        let available = system.cpus().len().max(1);
        let lanes = options.cpu_cores.unwrap_or(available).clamp(1, LANES);

        info!("Available CPU cores: {available}; starting {lanes} worker lane(s)");

        for lane in 0..lanes {
            let worker_shared = shared.clone();
            let worker_tx = submit_tx.clone();

            let spawned = thread::Builder::new()
                .name(format!("worker-{lane}"))
                .spawn(move || worker::run(lane, worker_shared, worker_tx));

            if let Err(err) = spawned {
                error!("Failed to spawn worker {lane}: {err}");
            }
        }

        drop(submit_tx);

        let task_shared = shared.clone();
        tokio::spawn(async move {
            stratum_task(task_shared, options, submit_rx).await;
        });

        Miner { shared }
    }

    /// Workers exit at their next poll, the stratum task at its next loop.
    pub fn stop(&self) {
        self.shared.stop.cancel();
    }

    /// Tears down the current connection; the task reconnects from scratch.
    pub fn reconnect(&self) {
        self.shared.reconnect.store(true, Ordering::SeqCst);
    }

    pub fn snapshot_stats(&self) -> StatsView {
        self.shared.stats.snapshot()
    }

    /// `host:port` of the pool currently connected, empty when none.
    pub fn current_pool(&self) -> String {
        self.shared.current_pool.read().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }
}

enum Exit {
    Stopped,
    Reconnect,
    Disconnected,
}

/// The connection state machine: DISCONNECTED -> CONNECTING -> handshake ->
/// MINING, back to DISCONNECTED on error, inactivity, or request. Primary is
/// tried first on every attempt; the backup only after the primary has been
/// down past the failover threshold.
async fn stratum_task(
    shared: Arc<Shared>,
    options: Options,
    mut submit_rx: mpsc::Receiver<ShareCandidate>,
) {
    let config = ClientConfig {
        username: options.username(),
        password: options.password.clone(),
        user_agent: USER_AGENT.into(),
        desired_difficulty: options.desired_difficulty,
        tuning: options.tuning,
    };

    let tuning = options.tuning;
    let mut primary_down_since: Option<Instant> = None;
    let mut warned_unconfigured = false;

    while !shared.stop.is_cancelled() {
        if options.wallet.is_empty() {
            if !warned_unconfigured {
                warn!("No wallet configured; stratum task idle");
                warned_unconfigured = true;
            }
            tokio::select! {
                _ = shared.stop.cancelled() => break,
                _ = sleep(tuning.unconfigured_delay) => {}
            }
            continue;
        }

        let established = match client::establish(&options.primary, &config, &shared.stats).await {
            Ok(link) => {
                primary_down_since = None;
                info!("Connected to primary pool {}", options.primary);
                Some((link, false))
            }
            Err(err) => {
                warn!("Primary pool {} unreachable: {err}", options.primary);
                let down_since = *primary_down_since.get_or_insert_with(Instant::now);

                let mut fallback = None;
                if let Some(backup) = &options.backup {
                    if down_since.elapsed() >= tuning.failover_threshold {
                        match client::establish(backup, &config, &shared.stats).await {
                            Ok(link) => {
                                info!("Connected to backup pool {backup}");
                                fallback = Some((link, true));
                            }
                            Err(err) => warn!("Backup pool {backup} unreachable: {err}"),
                        }
                    }
                }
                fallback
            }
        };

        let Some((mut link, using_backup)) = established else {
            tokio::select! {
                _ = shared.stop.cancelled() => break,
                _ = sleep(tuning.retry_delay) => {}
            }
            continue;
        };

        shared.connected.store(true, Ordering::SeqCst);
        *shared.current_pool.write() = link.conn.endpoint.to_string();

        let exit = mining_loop(
            &shared,
            &config,
            &options,
            &mut link,
            &mut submit_rx,
            using_backup,
        )
        .await;

        shared.connected.store(false, Ordering::SeqCst);

        match exit {
            Exit::Stopped => break,
            Exit::Reconnect | Exit::Disconnected => {}
        }
    }

    shared.connected.store(false, Ordering::SeqCst);
    info!("Stratum task stopped");
}

async fn mining_loop(
    shared: &Shared,
    config: &ClientConfig,
    options: &Options,
    link: &mut Link,
    submit_rx: &mut mpsc::Receiver<ShareCandidate>,
    mut using_backup: bool,
) -> Exit {
    let tuning = config.tuning;

    // Responses for the old socket can never arrive, so the ring starts
    // empty on every connection.
    let mut pending = PendingRing::new();
    let mut block_target = Target::zero();

    refresh_pool_target(shared, block_target, link.session.difficulty);

    for notify in std::mem::take(&mut link.deferred) {
        handle_notify(shared, &mut link.session, &notify, &mut block_target);
    }

    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut last_probe = Instant::now();

    let exit = loop {
        if shared.reconnect.swap(false, Ordering::SeqCst) {
            info!("Reconnect requested");
            break Exit::Reconnect;
        }

        tokio::select! {
            biased;

            _ = shared.stop.cancelled() => break Exit::Stopped,

            message = link.conn.read_message() => {
                match message {
                    Ok(Some(message)) => {
                        link.session.last_activity = Instant::now();
                        if let Some(exit) = handle_message(
                            shared,
                            &mut link.session,
                            &mut pending,
                            &mut block_target,
                            message,
                        ) {
                            break exit;
                        }
                    }
                    // a line was skipped; the server is alive regardless
                    Ok(None) => link.session.last_activity = Instant::now(),
                    Err(err) => {
                        warn!("Connection lost: {err}");
                        break Exit::Disconnected;
                    }
                }
            }

            candidate = submit_rx.recv() => {
                let Some(candidate) = candidate else {
                    break Exit::Stopped;
                };

                if let Err(err) = submit_share(shared, config, link, &mut pending, candidate).await {
                    warn!("Failed to submit share: {err}");
                    break Exit::Disconnected;
                }
            }

            _ = ticker.tick() => {
                let now = Instant::now();

                if now.duration_since(link.session.last_activity) >= tuning.inactivity_timeout {
                    warn!("Pool silent too long, disconnecting");
                    break Exit::Disconnected;
                }

                if now.duration_since(link.session.last_submit) >= tuning.keepalive_idle {
                    if let Some(exit) = send_keepalive(config, link).await {
                        break exit;
                    }
                }

                if using_backup && now.duration_since(last_probe) >= tuning.probe_interval {
                    last_probe = now;
                    if probe_primary(shared, config, options, link, &mut pending, &mut block_target).await {
                        using_backup = false;
                    }
                }
            }
        }
    };

    if pending.dropped() > 0 {
        debug!(
            "{} submissions were evicted from the pending ring unanswered",
            pending.dropped(),
        );
    }

    exit
}

async fn send_keepalive(config: &ClientConfig, link: &mut Link) -> Option<Exit> {
    let suggested = Difficulty::new(config.desired_difficulty).unwrap_or_default();

    let params = match serde_json::to_value(SuggestDifficulty(suggested)) {
        Ok(params) => params,
        Err(err) => {
            warn!("Failed to serialize keepalive: {err}");
            return None;
        }
    };

    let id = link.session.next_id();
    if let Err(err) = link
        .conn
        .send(&Message::request(id, "mining.suggest_difficulty", params))
        .await
    {
        warn!("Keepalive failed: {err}");
        return Some(Exit::Disconnected);
    }

    link.session.last_submit = Instant::now();
    debug!("Sent keepalive suggest_difficulty");
    None
}

/// While on the backup, periodically completes a full handshake with the
/// primary over a second socket; only on success is the live connection
/// swapped, all within this task, so the submission consumer never observes
/// a half-switched state.
async fn probe_primary(
    shared: &Shared,
    config: &ClientConfig,
    options: &Options,
    link: &mut Link,
    pending: &mut PendingRing,
    block_target: &mut Target,
) -> bool {
    info!("Probing primary pool {}", options.primary);

    match client::establish(&options.primary, config, &shared.stats).await {
        Ok(new_link) => {
            info!("Primary pool restored, switching back");

            // adopt the new socket; the backup connection drops here
            *link = new_link;
            *shared.current_pool.write() = link.conn.endpoint.to_string();

            pending.clear();
            *block_target = Target::zero();
            refresh_pool_target(shared, *block_target, link.session.difficulty);

            for notify in std::mem::take(&mut link.deferred) {
                handle_notify(shared, &mut link.session, &notify, block_target);
            }

            true
        }
        Err(err) => {
            debug!("Primary still down: {err}");
            false
        }
    }
}

fn handle_message(
    shared: &Shared,
    session: &mut client::Session,
    pending: &mut PendingRing,
    block_target: &mut Target,
    message: Message,
) -> Option<Exit> {
    match message {
        Message::Notification { method, params } => match method.as_str() {
            "mining.notify" => match serde_json::from_value::<Notify>(params) {
                Ok(notify) => handle_notify(shared, session, &notify, block_target),
                Err(e) => warn!("Failed to parse mining.notify: {e}"),
            },
            "mining.set_difficulty" => match serde_json::from_value::<SetDifficulty>(params) {
                Ok(set_difficulty) => {
                    let difficulty = set_difficulty.difficulty();
                    session.difficulty = difficulty.as_f64();
                    refresh_pool_target(shared, *block_target, session.difficulty);
                    info!("Pool difficulty set to {difficulty}");
                }
                Err(e) => warn!("Ignoring invalid mining.set_difficulty: {e}"),
            },
            "client.reconnect" => {
                info!("Pool requested reconnect");
                return Some(Exit::Reconnect);
            }
            other => debug!("Unhandled notification: {other}"),
        },
        Message::Response {
            id,
            result,
            error,
            reject_reason,
        } => {
            let Id::Number(id) = id else {
                debug!("Ignoring response with non-numeric id {id}");
                return None;
            };

            let accepted = error.is_none() && result == Some(json!(true));
            let reason = error.map(|e| e.message).or(reject_reason);
            pending.settle(&shared.stats, id as u32, accepted, reason);
        }
        Message::Request { method, id, .. } => {
            debug!("Ignoring server request {method} (id {id})");
        }
    }

    None
}

/// Builds and publishes a job for a notify. A job that cannot be built
/// (bad hex, oversize coinbase) is logged and dropped; mining continues on
/// the prior snapshot.
fn handle_notify(
    shared: &Shared,
    session: &mut client::Session,
    notify: &Notify,
    block_target: &mut Target,
) {
    let extranonce2 = Extranonce::random(session.extranonce2_size);

    match Job::assemble(notify, &session.extranonce1, extranonce2) {
        Ok(job) => {
            *block_target = job.block_target;
            refresh_pool_target(shared, *block_target, session.difficulty);

            info!(
                "New job {}: {} branches, clean_jobs={}",
                notify.job_id,
                notify.merkle_branches.len(),
                notify.clean_jobs,
            );

            shared.board.publish(job);
            shared.stats.record_template();
        }
        Err(err) => warn!("Ignoring unusable job {}: {err}", notify.job_id),
    }
}

/// Share threshold: the difficulty-1 target divided by the pool difficulty,
/// never harder than the block target itself. Keeps block <= pool for every
/// published job, even on regtest-style nbits.
fn pool_target_for(block_target: Target, difficulty: f64) -> Target {
    let share_target = Target::difficulty_one().divide_by(difficulty);

    if share_target < block_target {
        block_target
    } else {
        share_target
    }
}

fn refresh_pool_target(shared: &Shared, block_target: Target, difficulty: f64) {
    *shared.pool_target.write() = pool_target_for(block_target, difficulty);
}

async fn submit_share(
    shared: &Shared,
    config: &ClientConfig,
    link: &mut Link,
    pending: &mut PendingRing,
    candidate: ShareCandidate,
) -> Result<(), InternalError> {
    let msg_id = link.session.next_id();

    let submit = Submit {
        username: config.username.clone(),
        job_id: candidate.job_id.clone(),
        extranonce2: candidate.extranonce2,
        ntime: candidate.ntime,
        nonce: candidate.nonce,
    };

    link.conn
        .send(&Message::request(
            msg_id,
            "mining.submit",
            serde_json::to_value(&submit)?,
        ))
        .await?;

    if candidate.flags & worker::FULL_BLOCK != 0 {
        info!("Submitted a full block candidate on job {}", submit.job_id);
    }

    info!(
        "Submit: id={msg_id} job={} en2={} ntime={} nonce={}",
        submit.job_id, submit.extranonce2, submit.ntime, submit.nonce,
    );

    let evicted = pending.record(PendingShare {
        msg_id,
        sent_at: Instant::now(),
        job_id: candidate.job_id,
        nonce: candidate.nonce,
        flags: candidate.flags,
        difficulty: candidate.difficulty,
    });

    if evicted.is_some() {
        shared.stats.record_dropped();
    }

    shared.stats.record_sent();
    link.session.last_submit = Instant::now();

    Ok(())
}
