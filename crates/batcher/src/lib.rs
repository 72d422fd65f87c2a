//! Bounded point batching for ingestion services.
//!
//! A [`PointBatcher`] accumulates points and emits them as batches on any of
//! three triggers: the batch reaches `size` points, `duration` elapses since
//! the first point of the batch, or a flush is requested. At most `pending`
//! emitted batches may sit unconsumed; beyond that, emission blocks, which in
//! turn blocks producers — the one intentional pressure point between an
//! ingestion socket and a slow writer.

use models::Point;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Counters of a batcher's lifetime activity.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Stats {
    /// Points received.
    pub point_total: u64,
    /// Batches emitted, by any trigger.
    pub batch_total: u64,
    /// Batches emitted because they reached the size bound.
    pub size_total: u64,
    /// Batches emitted because their timer expired.
    pub timeout_total: u64,
}

#[derive(Default)]
struct AtomicStats {
    point_total: AtomicU64,
    batch_total: AtomicU64,
    size_total: AtomicU64,
    timeout_total: AtomicU64,
}

pub struct PointBatcher {
    input: mpsc::Sender<Point>,
    flush: mpsc::Sender<()>,
    stats: Arc<AtomicStats>,
    task: tokio::task::JoinHandle<()>,
}

impl PointBatcher {
    /// Start a batcher emitting batches of up to `size` points, no later
    /// than `duration` after a batch's first point, with at most `pending`
    /// unconsumed batches in flight. Returns the batcher and its batch
    /// stream, which yields `None` only after the batcher is closed and its
    /// final partial batch (if any) has been emitted.
    pub fn new(size: usize, pending: usize, duration: Duration) -> (Self, mpsc::Receiver<Vec<Point>>) {
        let size = size.max(1);
        let (input, in_rx) = mpsc::channel(1);
        let (flush, flush_rx) = mpsc::channel(1);
        let (out_tx, output) = mpsc::channel(pending.max(1));
        let stats = Arc::new(AtomicStats::default());

        let task = tokio::spawn(run(in_rx, flush_rx, out_tx, size, duration, stats.clone()));

        (
            Self {
                input,
                flush,
                stats,
                task,
            },
            output,
        )
    }

    /// A handle for enqueueing points. Sends block while the pending-batch
    /// bound is reached.
    pub fn input(&self) -> mpsc::Sender<Point> {
        self.input.clone()
    }

    /// Ask the batcher to emit its current partial batch.
    pub fn flush(&self) {
        // A full flush queue already guarantees an imminent flush.
        let _ = self.flush.try_send(());
    }

    /// Stop the batcher: emits any final partial batch, then ends the batch
    /// stream. Points already emitted remain consumable.
    pub async fn close(self) {
        let Self {
            input, flush, task, ..
        } = self;
        drop(input);
        drop(flush);
        // The task exits once every producer handle is gone.
        let _ = task.await;
    }

    pub fn stats(&self) -> Stats {
        Stats {
            point_total: self.stats.point_total.load(Ordering::Relaxed),
            batch_total: self.stats.batch_total.load(Ordering::Relaxed),
            size_total: self.stats.size_total.load(Ordering::Relaxed),
            timeout_total: self.stats.timeout_total.load(Ordering::Relaxed),
        }
    }
}

async fn run(
    mut in_rx: mpsc::Receiver<Point>,
    mut flush_rx: mpsc::Receiver<()>,
    out_tx: mpsc::Sender<Vec<Point>>,
    size: usize,
    duration: Duration,
    stats: Arc<AtomicStats>,
) {
    let mut batch: Vec<Point> = Vec::with_capacity(size);
    let mut deadline: Option<Instant> = None;

    let emit = |batch: &mut Vec<Point>, deadline: &mut Option<Instant>| {
        *deadline = None;
        stats.batch_total.fetch_add(1, Ordering::Relaxed);
        std::mem::replace(batch, Vec::with_capacity(size))
    };

    loop {
        let at = deadline;
        let timer = async move {
            match at {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            received = in_rx.recv() => match received {
                Some(point) => {
                    if batch.is_empty() {
                        deadline = Some(Instant::now() + duration);
                    }
                    batch.push(point);
                    stats.point_total.fetch_add(1, Ordering::Relaxed);

                    if batch.len() >= size {
                        stats.size_total.fetch_add(1, Ordering::Relaxed);
                        let ready = emit(&mut batch, &mut deadline);
                        // Blocks at the pending-batch bound, which in turn
                        // blocks producers.
                        if out_tx.send(ready).await.is_err() {
                            return;
                        }
                    }
                }
                None => {
                    // Producers are gone: emit the final partial batch and
                    // end the stream.
                    if !batch.is_empty() {
                        let ready = emit(&mut batch, &mut deadline);
                        let _ = out_tx.send(ready).await;
                    }
                    return;
                }
            },
            _ = timer => {
                stats.timeout_total.fetch_add(1, Ordering::Relaxed);
                let ready = emit(&mut batch, &mut deadline);
                if out_tx.send(ready).await.is_err() {
                    return;
                }
            }
            Some(()) = flush_rx.recv() => {
                if !batch.is_empty() {
                    let ready = emit(&mut batch, &mut deadline);
                    if out_tx.send(ready).await.is_err() {
                        return;
                    }
                }
            }
        }
    }
}
