use {
    super::*,
    tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf},
};

#[derive(Debug, Clone)]
pub(crate) struct ClientConfig {
    pub(crate) username: String,
    pub(crate) password: String,
    pub(crate) user_agent: String,
    pub(crate) desired_difficulty: f64,
    pub(crate) tuning: Tuning,
}

/// One authenticated connection's worth of state. Exactly one session is
/// live at a time; reconnecting or failing over builds a fresh one.
#[derive(Debug)]
pub(crate) struct Session {
    pub(crate) extranonce1: Extranonce,
    pub(crate) extranonce2_size: usize,
    pub(crate) difficulty: f64,
    pub(crate) last_activity: Instant,
    pub(crate) last_submit: Instant,
    id_counter: u32,
}

impl Session {
    fn new(subscribe: SubscribeResult, difficulty: f64, id_counter: u32) -> Self {
        let mut extranonce2_size = subscribe.extranonce2_size;
        if extranonce2_size > 8 {
            warn!("pool requested extranonce2_size {extranonce2_size}, clamping to 8");
            extranonce2_size = 8;
        }

        Self {
            extranonce1: subscribe.extranonce1,
            extranonce2_size,
            difficulty,
            last_activity: Instant::now(),
            last_submit: Instant::now(),
            id_counter,
        }
    }

    /// Message ids start at 1 and wrap back to 1; id 0 never goes out.
    pub(crate) fn next_id(&mut self) -> u32 {
        if self.id_counter == u32::MAX {
            self.id_counter = 1;
        }
        let id = self.id_counter;
        self.id_counter += 1;
        id
    }
}

/// Newline-delimited reader with a hard per-line cap. A line that outgrows
/// the cap is drained to its newline and dropped, so a hostile or broken
/// server can never make us buffer without bound.
pub(crate) struct LineReader<R> {
    inner: BufReader<R>,
    buffer: Vec<u8>,
    discarding: bool,
}

impl<R: tokio::io::AsyncRead + Unpin> LineReader<R> {
    pub(crate) fn new(inner: R) -> Self {
        Self {
            inner: BufReader::new(inner),
            buffer: Vec::new(),
            discarding: false,
        }
    }

    /// The next complete line, or `None` at EOF. Oversize lines are skipped
    /// internally with a warning.
    pub(crate) async fn next_line(&mut self) -> io::Result<Option<String>> {
        loop {
            let available = self.inner.fill_buf().await?;

            if available.is_empty() {
                return Ok(None);
            }

            match available.iter().position(|&byte| byte == b'\n') {
                Some(position) => {
                    if self.discarding {
                        self.inner.consume(position + 1);
                        self.discarding = false;
                        continue;
                    }

                    self.buffer.extend_from_slice(&available[..position]);
                    self.inner.consume(position + 1);

                    let mut line = std::mem::take(&mut self.buffer);
                    if line.last() == Some(&b'\r') {
                        line.pop();
                    }

                    return Ok(Some(String::from_utf8_lossy(&line).into_owned()));
                }
                None => {
                    let length = available.len();
                    if !self.discarding {
                        if self.buffer.len() + length > MAX_MESSAGE_SIZE {
                            warn!(
                                "line exceeded {MAX_MESSAGE_SIZE} bytes, draining to next newline"
                            );
                            self.buffer.clear();
                            self.discarding = true;
                        } else {
                            self.buffer.extend_from_slice(available);
                        }
                    }
                    self.inner.consume(length);
                }
            }
        }
    }
}

pub(crate) struct Connection {
    reader: LineReader<OwnedReadHalf>,
    writer: BufWriter<OwnedWriteHalf>,
    pub(crate) endpoint: PoolEndpoint,
}

impl Connection {
    pub(crate) async fn open(
        endpoint: &PoolEndpoint,
        connect_timeout: Duration,
    ) -> Result<Self, InternalError> {
        let stream = timeout(
            connect_timeout,
            TcpStream::connect((endpoint.host.as_str(), endpoint.port)),
        )
        .await
        .map_err(|source| InternalError::Timeout { source })?
        .map_err(|source| InternalError::Io { source })?;

        stream
            .set_nodelay(true)
            .map_err(|source| InternalError::Io { source })?;

        let (reader, writer) = stream.into_split();

        debug!("Connected to {endpoint}");

        Ok(Self {
            reader: LineReader::new(reader),
            writer: BufWriter::new(writer),
            endpoint: endpoint.clone(),
        })
    }

    /// One JSON object per line, `\n` terminated, flushed per message.
    pub(crate) async fn send(&mut self, message: &Message) -> Result<(), InternalError> {
        let frame = serde_json::to_string(message)? + "\n";

        self.writer.write_all(frame.as_bytes()).await?;
        self.writer.flush().await?;

        Ok(())
    }

    /// The next parseable message. `Ok(None)` means a line was skipped
    /// (oversize or malformed); EOF surfaces as `Disconnected`.
    pub(crate) async fn read_message(&mut self) -> Result<Option<Message>, InternalError> {
        let Some(line) = self.reader.next_line().await? else {
            return Err(InternalError::Disconnected);
        };

        if line.trim().is_empty() {
            return Ok(None);
        }

        match serde_json::from_str::<Message>(&line) {
            Ok(message) => Ok(Some(message)),
            Err(e) => {
                warn!("Invalid JSON message: {line:?} - {e}");
                Ok(None)
            }
        }
    }
}

/// An established connection: socket, session, and any `mining.notify`
/// lines the pool interleaved into the handshake, to be replayed by the
/// caller once mining starts.
pub(crate) struct Link {
    pub(crate) conn: Connection,
    pub(crate) session: Session,
    pub(crate) deferred: Vec<Notify>,
}

/// Connect and run the subscribe -> suggest_difficulty -> authorize
/// handshake. Handshake round-trips feed the latency stats like shares do.
pub(crate) async fn establish(
    endpoint: &PoolEndpoint,
    config: &ClientConfig,
    stats: &Stats,
) -> Result<Link, InternalError> {
    let tuning = config.tuning;
    let mut conn = Connection::open(endpoint, tuning.connect_timeout).await?;

    let mut difficulty = Difficulty::default();
    let mut deferred = Vec::new();
    let mut id_counter: u32 = 1;

    let subscribe_id = next_handshake_id(&mut id_counter);
    let started = Instant::now();

    conn.send(&Message::request(
        subscribe_id,
        "mining.subscribe",
        serde_json::to_value(Subscribe {
            user_agent: config.user_agent.clone(),
        })?,
    ))
    .await?;

    let response = wait_for_response(
        &mut conn,
        subscribe_id,
        &tuning,
        &mut difficulty,
        &mut deferred,
    )
    .await?;

    let subscribe: SubscribeResult = match response {
        Message::Response {
            result: Some(result),
            error: None,
            ..
        } => serde_json::from_value(result)?,
        Message::Response {
            error: Some(error), ..
        } => {
            return Err(InternalError::Protocol {
                message: format!("mining.subscribe error: {error}"),
            })
        }
        _ => {
            return Err(InternalError::Protocol {
                message: "mining.subscribe returned no result".into(),
            })
        }
    };

    stats.record_latency(started.elapsed());

    if subscribe.extranonce2_size == 0 {
        return Err(InternalError::Protocol {
            message: "pool sent extranonce2_size of zero".into(),
        });
    }

    info!(
        "Subscribed: extranonce1={}, extranonce2_size={}",
        subscribe.extranonce1, subscribe.extranonce2_size
    );

    let suggested = Difficulty::new(config.desired_difficulty).unwrap_or_default();
    conn.send(&Message::request(
        next_handshake_id(&mut id_counter),
        "mining.suggest_difficulty",
        serde_json::to_value(SuggestDifficulty(suggested))?,
    ))
    .await?;

    let authorize_id = next_handshake_id(&mut id_counter);
    let started = Instant::now();

    conn.send(&Message::request(
        authorize_id,
        "mining.authorize",
        serde_json::to_value(Authorize {
            username: config.username.clone(),
            password: config.password.clone(),
        })?,
    ))
    .await?;

    let response = wait_for_response(
        &mut conn,
        authorize_id,
        &tuning,
        &mut difficulty,
        &mut deferred,
    )
    .await?;

    match response {
        Message::Response {
            result: Some(result),
            error: None,
            ..
        } if result == json!(true) => {}
        Message::Response {
            error: Some(error), ..
        } => {
            return Err(InternalError::Protocol {
                message: format!("mining.authorize error: {error}"),
            })
        }
        _ => {
            return Err(InternalError::Protocol {
                message: "unauthorized".into(),
            })
        }
    }

    stats.record_latency(started.elapsed());
    info!("Authorized as {} on {}", config.username, endpoint);

    let session = Session::new(subscribe, difficulty.as_f64(), id_counter);

    Ok(Link {
        conn,
        session,
        deferred,
    })
}

fn next_handshake_id(counter: &mut u32) -> u32 {
    let id = *counter;
    *counter += 1;
    id
}

/// Reads lines until the response with `expected` arrives. Interleaved
/// `mining.set_difficulty` becomes live immediately; `mining.notify` is
/// deferred so it can never block the handshake; anything else is logged
/// and skipped. Bounded by a line limit and a per-read timeout.
async fn wait_for_response(
    conn: &mut Connection,
    expected: u32,
    tuning: &Tuning,
    difficulty: &mut Difficulty,
    deferred: &mut Vec<Notify>,
) -> Result<Message, InternalError> {
    for _ in 0..tuning.handshake_max_lines {
        let message = timeout(tuning.read_timeout, conn.read_message())
            .await
            .map_err(|_| InternalError::ResponseTimeout { id: expected })??;

        let Some(message) = message else {
            continue;
        };

        match message {
            Message::Notification { method, params } => match method.as_str() {
                "mining.set_difficulty" => match serde_json::from_value::<SetDifficulty>(params) {
                    Ok(set_difficulty) => {
                        *difficulty = set_difficulty.difficulty();
                        info!("Pool difficulty {difficulty} set during handshake");
                    }
                    Err(e) => warn!("Failed to parse mining.set_difficulty: {e}"),
                },
                "mining.notify" => match serde_json::from_value::<Notify>(params) {
                    Ok(notify) => deferred.push(notify),
                    Err(e) => warn!("Failed to parse mining.notify: {e}"),
                },
                other => debug!("Ignoring {other} during handshake"),
            },
            Message::Response { ref id, .. } => {
                if *id == Id::Number(expected.into()) {
                    return Ok(message);
                }
                debug!("Skipping response for id {id} while waiting for {expected}");
            }
            Message::Request { ref method, .. } => {
                debug!("Ignoring server request {method} during handshake");
            }
        }
    }

    Err(InternalError::Protocol {
        message: format!("no response for id {expected} within {} lines", tuning.handshake_max_lines),
    })
}
