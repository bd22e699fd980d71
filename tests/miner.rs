use {
    cinder::{
        options::{Options, PoolEndpoint, Tuning},
        Miner,
    },
    serde_json::{json, Value},
    std::{
        net::SocketAddr,
        sync::{Arc, Mutex},
        time::{Duration, Instant},
    },
    tokio::{
        io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines},
        net::{
            tcp::{OwnedReadHalf, OwnedWriteHalf},
            TcpListener,
        },
        time::sleep,
    },
};

const WALLET: &str = "bc1q8jx6g9ujlqmdx3jnt3ap6ll2fdwqjdkdgs959m";

const COINB1: &str = "01000000010000000000000000000000000000000000000000000000000000000000000000ffffffff20020862062f503253482f04b8864e5008";
const COINB2: &str = "072f736c7573682f000000000100f2052a010000001976a914d23fcdf86f7e756a64a7a9688ef9903327048ed988ac00000000";

struct Pool {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

#[derive(Clone, Default)]
struct SubmitLog(Arc<Mutex<Vec<(String, Instant)>>>);

impl SubmitLog {
    fn record(&self, job_id: String) {
        self.0.lock().unwrap().push((job_id, Instant::now()));
    }

    fn entries(&self) -> Vec<(String, Instant)> {
        self.0.lock().unwrap().clone()
    }

    fn count(&self) -> usize {
        self.0.lock().unwrap().len()
    }

    fn count_for(&self, job_id: &str) -> usize {
        self.0
            .lock()
            .unwrap()
            .iter()
            .filter(|(job, _)| job == job_id)
            .count()
    }
}

impl Pool {
    async fn accept(listener: &TcpListener) -> Self {
        let (stream, _) = listener.accept().await.unwrap();
        let (reader, writer) = stream.into_split();
        Self {
            lines: BufReader::new(reader).lines(),
            writer,
        }
    }

    async fn next_request(&mut self) -> Value {
        loop {
            let line = self
                .lines
                .next_line()
                .await
                .unwrap()
                .expect("client closed connection");
            if line.trim().is_empty() {
                continue;
            }
            return serde_json::from_str(&line).unwrap();
        }
    }

    async fn send(&mut self, value: Value) {
        let frame = value.to_string() + "\n";
        self.writer.write_all(frame.as_bytes()).await.unwrap();
        self.writer.flush().await.unwrap();
    }

    async fn send_raw(&mut self, bytes: &[u8]) {
        self.writer.write_all(bytes).await.unwrap();
        self.writer.flush().await.unwrap();
    }

    /// subscribe-OK, consume suggest_difficulty, authorize-OK.
    async fn handshake(&mut self, extranonce1: &str) {
        let subscribe = self.next_request().await;
        assert_eq!(subscribe["method"], "mining.subscribe");
        let id = subscribe["id"].clone();
        self.send(json!({
            "id": id,
            "result": [[["mining.notify", "ae6812eb"]], extranonce1, 4],
            "error": null,
        }))
        .await;

        let suggest = self.next_request().await;
        assert_eq!(suggest["method"], "mining.suggest_difficulty");

        let authorize = self.next_request().await;
        assert_eq!(authorize["method"], "mining.authorize");
        assert_eq!(authorize["params"][0], WALLET);
        let id = authorize["id"].clone();
        self.send(json!({"id": id, "result": true, "error": null}))
            .await;
    }

    async fn notify(&mut self, job_id: &str, nbits: &str, clean_jobs: bool) {
        self.send(json!({
            "id": null,
            "method": "mining.notify",
            "params": [
                job_id,
                "4d16b6f85af6e2198f44ae2a6de67f78487ae5611b77c6c0440b921e00000000",
                COINB1,
                COINB2,
                [],
                "20000000",
                nbits,
                "665f2b4a",
                clean_jobs,
            ],
        }))
        .await;
    }

    async fn set_difficulty(&mut self, difficulty: f64) {
        self.send(json!({
            "id": null,
            "method": "mining.set_difficulty",
            "params": [difficulty],
        }))
        .await;
    }

    /// Answers every mining.submit, recording job ids; ignores keepalives.
    async fn serve_submits(mut self, log: SubmitLog, accept: bool) {
        loop {
            let Ok(Some(line)) = self.lines.next_line().await else {
                return;
            };
            if line.trim().is_empty() {
                continue;
            }
            let request: Value = serde_json::from_str(&line).unwrap();

            if request["method"] == "mining.submit" {
                let params = request["params"].as_array().unwrap();
                assert_eq!(params.len(), 5, "five submit params");
                assert_eq!(params[0], WALLET);
                assert_eq!(params[2].as_str().unwrap().len(), 8, "extranonce2 hex");
                assert_eq!(params[3].as_str().unwrap().len(), 8, "ntime hex");
                assert_eq!(params[4].as_str().unwrap().len(), 8, "nonce hex");

                log.record(params[1].as_str().unwrap().to_string());

                let response = if accept {
                    json!({"id": request["id"], "result": true, "error": null})
                } else {
                    json!({
                        "id": request["id"],
                        "result": null,
                        "error": [21, "Stale", null],
                    })
                };
                self.send(response).await;
            }
        }
    }
}

async fn listener() -> (TcpListener, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, addr)
}

fn endpoint(addr: SocketAddr) -> PoolEndpoint {
    format!("127.0.0.1:{}", addr.port()).parse().unwrap()
}

fn options(addr: SocketAddr) -> Options {
    let mut options = Options::new(endpoint(addr), WALLET);
    options.desired_difficulty = 0.00001;
    options.cpu_cores = Some(1);
    options
}

async fn wait_for(deadline: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < deadline {
        if condition() {
            return true;
        }
        sleep(Duration::from_millis(50)).await;
    }
    false
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn happy_path_share_accepted() {
    let (listener, addr) = listener().await;
    let log = SubmitLog::default();

    let server_log = log.clone();
    tokio::spawn(async move {
        let mut pool = Pool::accept(&listener).await;
        pool.handshake("a1b2c3d4").await;
        pool.set_difficulty(0.00001).await;
        pool.notify("j1", "207fffff", true).await;
        pool.serve_submits(server_log, true).await;
    });

    let miner = Miner::start(options(addr));

    assert!(
        wait_for(Duration::from_secs(60), || {
            miner.snapshot_stats().shares_accepted >= 1
        })
        .await,
        "expected an accepted share"
    );

    let stats = miner.snapshot_stats();
    assert!(stats.best_difficulty > 0.0);
    assert!(stats.templates >= 1);
    assert!(stats.hashes > 0);
    assert_eq!(stats.shares_rejected, 0);
    assert!(stats.last_latency_ms <= stats.uptime_secs * 1000 + 1000);

    assert!(miner.is_connected());
    assert_eq!(miner.current_pool(), format!("127.0.0.1:{}", addr.port()));
    assert!(log.count_for("j1") >= 1);

    miner.stop();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn rejected_share_preserves_connection() {
    let (listener, addr) = listener().await;
    let log = SubmitLog::default();

    let server_log = log.clone();
    tokio::spawn(async move {
        let mut pool = Pool::accept(&listener).await;
        pool.handshake("a1b2c3d4").await;
        pool.notify("j1", "207fffff", true).await;
        pool.serve_submits(server_log, false).await;
    });

    let miner = Miner::start(options(addr));

    assert!(
        wait_for(Duration::from_secs(60), || {
            miner.snapshot_stats().shares_rejected >= 1
        })
        .await,
        "expected a rejected share"
    );

    assert_eq!(miner.snapshot_stats().shares_accepted, 0);

    sleep(Duration::from_millis(500)).await;
    assert!(miner.is_connected(), "rejection must not drop the connection");

    miner.stop();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn set_difficulty_interleaved_into_handshake() {
    let (listener, addr) = listener().await;
    let log = SubmitLog::default();

    let server_log = log.clone();
    tokio::spawn(async move {
        let mut pool = Pool::accept(&listener).await;

        let subscribe = pool.next_request().await;
        assert_eq!(subscribe["method"], "mining.subscribe");
        let id = subscribe["id"].clone();
        pool.send(json!({
            "id": id,
            "result": [[["mining.notify", "ae6812eb"]], "a1b2c3d4", 4],
            "error": null,
        }))
        .await;

        let suggest = pool.next_request().await;
        assert_eq!(suggest["method"], "mining.suggest_difficulty");

        // difficulty injected before the authorize response lands
        pool.set_difficulty(1_000_000_000.0).await;

        let authorize = pool.next_request().await;
        assert_eq!(authorize["method"], "mining.authorize");
        let id = authorize["id"].clone();
        pool.send(json!({"id": id, "result": true, "error": null}))
            .await;

        // hard enough that no CPU finds a share at difficulty 1e9
        pool.notify("quiet", "1a00ffff", true).await;

        let quiet_until = Instant::now() + Duration::from_secs(3);
        while Instant::now() < quiet_until {
            if let Ok(request) =
                tokio::time::timeout(Duration::from_millis(200), pool.next_request()).await
            {
                assert_ne!(
                    request["method"], "mining.submit",
                    "no shares while the handshake difficulty is in force"
                );
            }
        }

        // dropping the difficulty must take effect with no job rebuild
        pool.set_difficulty(0.00001).await;

        pool.serve_submits(server_log, true).await;
    });

    let miner = Miner::start(options(addr));

    assert!(
        wait_for(Duration::from_secs(30), || miner.is_connected()).await,
        "handshake completes despite the interleaved notification"
    );

    sleep(Duration::from_secs(2)).await;
    assert_eq!(
        log.count(),
        0,
        "the handshake difficulty applied to the first job"
    );
    assert!(miner.snapshot_stats().hashes > 0, "mining is running");

    assert!(
        wait_for(Duration::from_secs(60), || log.count() >= 1).await,
        "lowered difficulty takes effect on the live job"
    );

    miner.stop();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn clean_jobs_notify_preempts_prior_job() {
    let (listener, addr) = listener().await;
    let log = SubmitLog::default();

    let server_log = log.clone();
    let preempt_at: Arc<Mutex<Option<Instant>>> = Arc::new(Mutex::new(None));
    let server_preempt_at = preempt_at.clone();

    tokio::spawn(async move {
        let mut pool = Pool::accept(&listener).await;
        pool.handshake("a1b2c3d4").await;
        pool.notify("a", "207fffff", true).await;

        sleep(Duration::from_millis(500)).await;

        pool.notify("b", "207fffff", true).await;
        *server_preempt_at.lock().unwrap() = Some(Instant::now());

        pool.serve_submits(server_log, true).await;
    });

    let miner = Miner::start(options(addr));

    assert!(
        wait_for(Duration::from_secs(60), || log.count_for("b") >= 1).await,
        "shares for the replacement job arrive"
    );

    // grace window, then the old job must be gone from the pipeline
    sleep(Duration::from_secs(2)).await;
    let cutoff = preempt_at.lock().unwrap().unwrap() + Duration::from_millis(1500);

    let stale: Vec<(String, Instant)> = log
        .entries()
        .into_iter()
        .filter(|(job, at)| job == "a" && *at > cutoff)
        .collect();

    assert!(
        stale.is_empty(),
        "no job-a submissions after the grace window: {stale:?}"
    );

    miner.stop();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failover_to_backup_and_back() {
    // reserve a port for the primary, then refuse connections on it
    let (parked, primary_addr) = listener().await;
    drop(parked);

    let (backup_listener, backup_addr) = listener().await;
    let log = SubmitLog::default();

    let backup_log = log.clone();
    tokio::spawn(async move {
        let mut pool = Pool::accept(&backup_listener).await;
        pool.handshake("b1b2c3d4").await;
        pool.notify("bk1", "207fffff", true).await;
        pool.serve_submits(backup_log, true).await;
    });

    let mut options = options(primary_addr);
    options.backup = Some(endpoint(backup_addr));
    options.tuning = Tuning {
        connect_timeout: Duration::from_secs(1),
        read_timeout: Duration::from_secs(2),
        retry_delay: Duration::from_millis(250),
        failover_threshold: Duration::from_secs(1),
        probe_interval: Duration::from_secs(2),
        ..Tuning::default()
    };

    let miner = Miner::start(options);

    let backup = format!("127.0.0.1:{}", backup_addr.port());
    assert!(
        wait_for(Duration::from_secs(20), || {
            miner.is_connected() && miner.current_pool() == backup
        })
        .await,
        "miner fails over to the backup pool"
    );

    assert!(
        wait_for(Duration::from_secs(30), || log.count_for("bk1") >= 1).await,
        "mining on the backup"
    );

    // primary comes back; the next probe should switch over
    let primary_listener = TcpListener::bind(primary_addr).await.unwrap();
    let primary_log = log.clone();
    tokio::spawn(async move {
        let mut pool = Pool::accept(&primary_listener).await;
        pool.handshake("a1b2c3d4").await;
        pool.notify("pr1", "207fffff", true).await;
        pool.serve_submits(primary_log, true).await;
    });

    let primary = format!("127.0.0.1:{}", primary_addr.port());
    assert!(
        wait_for(Duration::from_secs(30), || {
            miner.is_connected() && miner.current_pool() == primary
        })
        .await,
        "miner switches back to the primary pool"
    );

    assert!(
        wait_for(Duration::from_secs(30), || log.count_for("pr1") >= 1).await,
        "mining continuity across the switch"
    );

    miner.stop();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn oversize_line_is_discarded_without_losing_the_connection() {
    let (listener, addr) = listener().await;
    let log = SubmitLog::default();

    let server_log = log.clone();
    tokio::spawn(async move {
        let mut pool = Pool::accept(&listener).await;
        pool.handshake("a1b2c3d4").await;
        pool.notify("j1", "207fffff", true).await;

        // 10 KB of garbage with the newline withheld for a second
        pool.send_raw(&vec![b'x'; 10 * 1024]).await;
        sleep(Duration::from_secs(1)).await;
        pool.send_raw(b"\n").await;

        pool.notify("j2", "207fffff", true).await;
        pool.serve_submits(server_log, true).await;
    });

    let miner = Miner::start(options(addr));

    assert!(
        wait_for(Duration::from_secs(60), || log.count_for("j2") >= 1).await,
        "mining continues on the job sent after the oversize line"
    );

    assert!(miner.is_connected());

    miner.stop();
}
