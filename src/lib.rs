use {
    anyhow::{anyhow, bail, Context, Error},
    arguments::Arguments,
    clap::Parser,
    job::{Job, JobBoard, LANES},
    options::{Options, PoolEndpoint, Tuning},
    parking_lot::RwLock,
    rand::{Rng, RngCore},
    serde::{
        de::{self, Deserializer},
        ser::SerializeSeq,
        Deserialize, Serialize, Serializer,
    },
    serde_json::{json, Value},
    serde_with::{DeserializeFromStr, SerializeDisplay},
    sha256::{sha256d, Midstate},
    snafu::Snafu,
    stats::Stats,
    std::{
        fmt::{self, Display, Formatter},
        io,
        str::FromStr,
        sync::{
            atomic::{AtomicBool, AtomicU64, Ordering},
            Arc,
        },
        thread,
        time::{Duration, Instant},
    },
    stratum::{
        Difficulty, Extranonce, Id, InternalError, MerkleNode, Message, Nonce, Notify, Ntime,
        SetDifficulty, Submit, SuggestDifficulty,
    },
    submitter::{PendingRing, PendingShare},
    sysinfo::System,
    target::Target,
    tokio::{
        io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter},
        net::TcpStream,
        runtime::Runtime,
        sync::mpsc,
        time::{sleep, timeout, MissedTickBehavior},
    },
    tokio_util::sync::CancellationToken,
    tracing::{debug, error, info, warn},
    tracing_appender::non_blocking,
    tracing_subscriber::EnvFilter,
    worker::ShareCandidate,
};

pub use {miner::Miner, stats::StatsView};

mod arguments;
pub mod job;
pub mod miner;
pub mod options;
mod sha256;
mod signal;
pub mod stats;
pub mod stratum;
mod submitter;
pub mod target;
mod worker;

pub const USER_AGENT: &str = concat!("cinder/", env!("CARGO_PKG_VERSION"));

/// Hard upper bound on a single stratum line; longer lines are drained and
/// discarded, never buffered.
pub const MAX_MESSAGE_SIZE: usize = 4 * 1024;

/// Serialised coinbase transactions beyond this are rejected.
pub const COINBASE_MAX_SIZE: usize = 4 * 1024;

/// Depth of the worker -> stratum submission queue.
pub const SUBMIT_QUEUE_DEPTH: usize = 16;

type Result<T = (), E = Error> = std::result::Result<T, E>;

pub fn main() {
    let (writer, _guard) = non_blocking(io::stderr());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(writer)
        .init();

    let args = Arguments::parse();

    Runtime::new()
        .expect("failed to create tokio runtime")
        .block_on(async {
            let cancel_token = signal::setup_signal_handler();

            if let Err(err) = args.run(cancel_token).await {
                error!("error: {err:#}");
                std::process::exit(1);
            }
        });
}
