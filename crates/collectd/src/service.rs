use crate::packet::{self, ParseOpts, ValueList};
use crate::typesdb::{self, TypesDb, TypesDbError};
use crate::{
    AuthFile, Config, Error, MetaClient, MultiValueMode, PasswordLookup, PointsWriter, Result,
    SecurityLevel,
};
use batcher::PointBatcher;
use models::{ConsistencyLevel, FieldValue, Point, Statistic, StatisticTags, Tags};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

// Statistic value names, as collected into the monitoring database.
const STAT_POINTS_RECEIVED: &str = "pointsRx";
const STAT_BYTES_RECEIVED: &str = "bytesRx";
const STAT_POINTS_PARSE_FAIL: &str = "pointsParseFail";
const STAT_READ_FAIL: &str = "readFail";
const STAT_BATCHES_TRANSMITTED: &str = "batchesTx";
const STAT_POINTS_TRANSMITTED: &str = "pointsTx";
const STAT_BATCHES_TRANSMIT_FAIL: &str = "batchesTxFail";
const STAT_DROPPED_POINTS_INVALID: &str = "droppedPointsInvalid";

#[derive(Default)]
struct Stats {
    points_rx: AtomicU64,
    bytes_rx: AtomicU64,
    points_parse_fail: AtomicU64,
    read_fail: AtomicU64,
    batches_tx: AtomicU64,
    points_tx: AtomicU64,
    batches_tx_fail: AtomicU64,
    dropped_points_invalid: AtomicU64,
}

impl Stats {
    fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }
}

/// A UDP server which receives metrics in collectd's binary protocol and
/// stores them in the configured database.
pub struct Service {
    config: Config,
    meta_client: Arc<dyn MetaClient>,
    points_writer: Arc<dyn PointsWriter>,
    stats: Arc<Stats>,
    default_tags: StatisticTags,
    types_override: std::sync::Mutex<Option<TypesDb>>,
    state: tokio::sync::Mutex<Option<Running>>,
}

struct Running {
    cancel: CancellationToken,
    addr: SocketAddr,
    batcher: PointBatcher,
    serve: tokio::task::JoinHandle<()>,
    write: tokio::task::JoinHandle<()>,
}

impl Service {
    pub fn new(
        config: Config,
        meta_client: Arc<dyn MetaClient>,
        points_writer: Arc<dyn PointsWriter>,
    ) -> Self {
        let default_tags =
            StatisticTags::from([("bind".to_string(), config.bind_address.clone())]);

        Self {
            config,
            meta_client,
            points_writer,
            stats: Arc::new(Stats::default()),
            default_tags,
            types_override: std::sync::Mutex::new(None),
            state: tokio::sync::Mutex::new(None),
        }
    }

    /// Replace the types database with one parsed from `types`, instead of
    /// loading from the configured path at open.
    pub fn set_types(&self, types: &str) -> std::result::Result<(), TypesDbError> {
        let parsed = TypesDb::parse(types)?;
        *self.types_override.lock().unwrap() = Some(parsed);
        Ok(())
    }

    /// The bound local address, while the service is open.
    pub async fn addr(&self) -> Option<SocketAddr> {
        self.state.lock().await.as_ref().map(|running| running.addr)
    }

    /// Start the service: bind the socket and launch the serve and
    /// write-points tasks. A failed open leaves the service closed; opening
    /// an already-open service succeeds without effect.
    pub async fn open(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.is_some() {
            return Ok(());
        }

        tracing::info!("starting collectd service");
        self.config.validate()?;

        let types_db = match self.types_override.lock().unwrap().clone() {
            Some(types_db) => types_db,
            None => typesdb::load(&self.config.typesdb),
        };

        let password_lookup: Option<Arc<dyn PasswordLookup>> =
            if self.config.security_level == SecurityLevel::None {
                None
            } else {
                let auth =
                    AuthFile::load(&self.config.auth_file).map_err(Error::AuthFile)?;
                Some(Arc::new(auth))
            };

        let parse_opts = ParseOpts {
            security_level: self.config.security_level,
            password_lookup,
            types_db,
        };

        let addr = resolve_udp_addr(&self.config.bind_address).await?;
        let socket = bind_udp(addr, self.config.read_buffer)?;
        let local_addr = socket.local_addr().map_err(Error::Listen)?;
        tracing::info!(addr = %local_addr, "listening on UDP");

        let (batcher, output) = PointBatcher::new(
            self.config.batch_size,
            self.config.batch_pending,
            self.config.batch_duration,
        );
        let cancel = CancellationToken::new();

        let serve = tokio::spawn(serve(
            socket,
            batcher.input(),
            cancel.clone(),
            self.stats.clone(),
            parse_opts,
            self.config.parse_multi_value_plugin,
        ));
        let write = tokio::spawn(write_points(
            output,
            self.meta_client.clone(),
            self.points_writer.clone(),
            self.config.database.clone(),
            self.config.retention_policy.clone(),
            self.stats.clone(),
        ));

        *state = Some(Running {
            cancel,
            addr: local_addr,
            batcher,
            serve,
            write,
        });
        Ok(())
    }

    /// Stop the service: unblock the socket reader, flush the batcher, and
    /// join both tasks. Idempotent; a second close is a successful no-op.
    pub async fn close(&self) {
        let running = self.state.lock().await.take();
        let Some(running) = running else {
            return; // Already closed.
        };

        running.cancel.cancel();
        let _ = running.serve.await;
        // With the serve task gone, closing the batcher flushes the final
        // partial batch and ends the stream the write task drains.
        running.batcher.close().await;
        let _ = running.write.await;

        tracing::info!("closed collectd service");
    }

    /// Monitoring snapshot, tagged with the bind address plus `tags`.
    pub fn statistics(&self, tags: &StatisticTags) -> Vec<Statistic> {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);

        vec![Statistic::new("collectd")
            .with_tags(tags.clone())
            .with_value(STAT_POINTS_RECEIVED, load(&self.stats.points_rx))
            .with_value(STAT_BYTES_RECEIVED, load(&self.stats.bytes_rx))
            .with_value(STAT_POINTS_PARSE_FAIL, load(&self.stats.points_parse_fail))
            .with_value(STAT_READ_FAIL, load(&self.stats.read_fail))
            .with_value(STAT_BATCHES_TRANSMITTED, load(&self.stats.batches_tx))
            .with_value(STAT_POINTS_TRANSMITTED, load(&self.stats.points_tx))
            .with_value(STAT_BATCHES_TRANSMIT_FAIL, load(&self.stats.batches_tx_fail))
            .with_value(
                STAT_DROPPED_POINTS_INVALID,
                load(&self.stats.dropped_points_invalid),
            )
            .merge_default_tags(&self.default_tags)]
    }
}

async fn resolve_udp_addr(bind_address: &str) -> Result<SocketAddr> {
    // A bare ":port" binds all interfaces.
    let address = if bind_address.starts_with(':') {
        format!("0.0.0.0{bind_address}")
    } else {
        bind_address.to_string()
    };

    let mut resolved =
        tokio::net::lookup_host(&address)
            .await
            .map_err(|source| Error::ResolveAddress {
                address: address.clone(),
                source,
            })?;
    let first = resolved.next();
    drop(resolved);
    first.ok_or(Error::NoAddress(address))
}

fn bind_udp(addr: SocketAddr, read_buffer: usize) -> Result<UdpSocket> {
    use socket2::{Domain, Protocol, Socket, Type};

    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))
        .map_err(Error::Listen)?;
    if read_buffer > 0 {
        socket
            .set_recv_buffer_size(read_buffer)
            .map_err(|source| Error::ReadBuffer {
                size: read_buffer,
                source,
            })?;
    }
    socket.bind(&addr.into()).map_err(Error::Listen)?;
    socket.set_nonblocking(true).map_err(Error::Listen)?;
    UdpSocket::from_std(socket.into()).map_err(Error::Listen)
}

async fn serve(
    socket: UdpSocket,
    input: mpsc::Sender<Point>,
    cancel: CancellationToken,
    stats: Arc<Stats>,
    opts: ParseOpts,
    mode: MultiValueMode,
) {
    // Maximum collectd v5 payload over UDP/IPv6/Ethernet. Longer payloads
    // arrive truncated, which is protocol behavior rather than a defect.
    let mut buffer = [0u8; 1452];

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            received = socket.recv_from(&mut buffer) => match received {
                Ok((n, _peer)) if n > 0 => {
                    Stats::add(&stats.bytes_rx, n as u64);
                    if !handle_message(&buffer[..n], &opts, mode, &input, &cancel, &stats).await {
                        return;
                    }
                }
                Ok(_) => {}
                Err(error) => {
                    if cancel.is_cancelled() {
                        // The socket error was our own close.
                        return;
                    }
                    Stats::add(&stats.read_fail, 1);
                    tracing::info!(%error, "UDP read error");
                }
            }
        }
    }
}

/// Parse one datagram and enqueue its points. Returns false once the
/// service is shutting down and no further reads should happen.
async fn handle_message(
    buffer: &[u8],
    opts: &ParseOpts,
    mode: MultiValueMode,
    input: &mpsc::Sender<Point>,
    cancel: &CancellationToken,
    stats: &Stats,
) -> bool {
    let lists = match packet::parse(buffer, opts) {
        Ok(lists) => lists,
        Err(error) => {
            // The datagram is dropped whole; no partial points.
            Stats::add(&stats.points_parse_fail, 1);
            tracing::info!(%error, "collectd parse error");
            return true;
        }
    };

    for value_list in &lists {
        let points = match mode {
            MultiValueMode::Split => unmarshal_value_list(value_list, stats),
            MultiValueMode::Join => unmarshal_value_list_packed(value_list, stats),
        };
        let enqueued = points.len() as u64;

        for point in points {
            tokio::select! {
                _ = cancel.cancelled() => return false,
                sent = input.send(point) => {
                    if sent.is_err() {
                        return false;
                    }
                }
            }
        }
        Stats::add(&stats.points_rx, enqueued);
    }
    true
}

fn value_list_tags(vl: &ValueList) -> Tags {
    let mut tags = Tags::new();
    if !vl.host.is_empty() {
        tags.insert("host".to_string(), vl.host.clone());
    }
    if !vl.plugin_instance.is_empty() {
        tags.insert("instance".to_string(), vl.plugin_instance.clone());
    }
    if !vl.r#type.is_empty() {
        tags.insert("type".to_string(), vl.r#type.clone());
    }
    if !vl.type_instance.is_empty() {
        tags.insert("type_instance".to_string(), vl.type_instance.clone());
    }
    tags
}

/// Split mode: one point per value, named `<plugin>_<dsname>`, with the
/// single field `value`.
fn unmarshal_value_list(vl: &ValueList, stats: &Stats) -> Vec<Point> {
    let mut points = Vec::with_capacity(vl.values.len());

    for (i, value) in vl.values.iter().enumerate() {
        let name = format!("{}_{}", vl.plugin, vl.ds_names[i]);
        let fields = BTreeMap::from([("value".to_string(), FieldValue::Float(value.as_f64()))]);

        match Point::new(name, value_list_tags(vl), fields, vl.time) {
            Ok(point) => points.push(point),
            Err(error) => {
                Stats::add(&stats.dropped_points_invalid, 1);
                tracing::info!(%error, "dropping point");
            }
        }
    }
    points
}

/// Join mode: one point per value-list, named `<plugin>`, with one field per
/// data source — so values that belong together, stay together, e.g.
/// `(df, {used: 1000, free: 2500})`.
fn unmarshal_value_list_packed(vl: &ValueList, stats: &Stats) -> Vec<Point> {
    let fields: BTreeMap<String, FieldValue> = vl
        .values
        .iter()
        .enumerate()
        .map(|(i, value)| (vl.ds_names[i].clone(), FieldValue::Float(value.as_f64())))
        .collect();

    match Point::new(vl.plugin.clone(), value_list_tags(vl), fields, vl.time) {
        Ok(point) => vec![point],
        Err(error) => {
            Stats::add(&stats.dropped_points_invalid, 1);
            tracing::info!(%error, "dropping point");
            Vec::new()
        }
    }
}

async fn write_points(
    mut output: mpsc::Receiver<Vec<Point>>,
    meta_client: Arc<dyn MetaClient>,
    points_writer: Arc<dyn PointsWriter>,
    database: String,
    retention_policy: String,
    stats: Arc<Stats>,
) {
    // Has the target database been created yet?
    let mut ready = false;

    while let Some(batch) = output.recv().await {
        if !ready {
            match meta_client.create_database(&database).await {
                Ok(()) => ready = true,
                Err(error) => {
                    // Drop the batch; the next one retries.
                    tracing::info!(db = %database, %error, "required database not yet created");
                    continue;
                }
            }
        }

        let points = batch.len() as u64;
        match points_writer
            .write_points_privileged(&database, &retention_policy, ConsistencyLevel::Any, batch)
            .await
        {
            Ok(()) => {
                Stats::add(&stats.batches_tx, 1);
                Stats::add(&stats.points_tx, points);
            }
            Err(error) => {
                Stats::add(&stats.batches_tx_fail, 1);
                tracing::info!(db = %database, %error, "failed to write point batch to database");
            }
        }
    }
}
