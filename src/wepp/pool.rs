//! Worker pools for file-materialization fan-outs (soil prep).
//!
//! A batch first runs on a dedicated rayon pool sized to the requested
//! worker count. If that pool cannot be built, or a worker panics, the batch
//! is rerun on rayon's global pool, and after that sequentially on the
//! calling thread. Tasks must therefore be idempotent.

use crate::error::{Error, Result};
use rayon::prelude::*;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolKind {
    Dedicated,
    Global,
    Sequential,
}

impl PoolKind {
    fn next(self) -> Option<PoolKind> {
        match self {
            PoolKind::Dedicated => Some(PoolKind::Global),
            PoolKind::Global => Some(PoolKind::Sequential),
            PoolKind::Sequential => None,
        }
    }
}

/// Worker count: `requested` or the CPU count, clamped to `[1, max(cpu, 16)]`.
pub fn worker_count(requested: Option<usize>) -> usize {
    let cpus = num_cpus::get();
    requested.unwrap_or(cpus).clamp(1, cpus.max(16))
}

enum Attempt<R> {
    Done(Result<Vec<R>>),
    Broken(String),
}

fn attempt<T, R, F>(kind: PoolKind, items: &[T], workers: usize, f: &F) -> Attempt<R>
where
    T: Sync,
    R: Send,
    F: Fn(&T) -> Result<R> + Sync,
{
    match kind {
        PoolKind::Dedicated => {
            let pool = match rayon::ThreadPoolBuilder::new().num_threads(workers).build() {
                Ok(pool) => pool,
                Err(e) => return Attempt::Broken(e.to_string()),
            };
            match panic::catch_unwind(AssertUnwindSafe(|| {
                pool.install(|| items.par_iter().map(f).collect::<Result<Vec<R>>>())
            })) {
                Ok(out) => Attempt::Done(out),
                Err(_) => Attempt::Broken("worker panicked".to_string()),
            }
        }
        PoolKind::Global => {
            match panic::catch_unwind(AssertUnwindSafe(|| {
                items.par_iter().map(f).collect::<Result<Vec<R>>>()
            })) {
                Ok(out) => Attempt::Done(out),
                Err(_) => Attempt::Broken("worker panicked".to_string()),
            }
        }
        PoolKind::Sequential => {
            match panic::catch_unwind(AssertUnwindSafe(|| {
                items.iter().map(f).collect::<Result<Vec<R>>>()
            })) {
                Ok(out) => Attempt::Done(out),
                Err(_) => Attempt::Broken("task panicked".to_string()),
            }
        }
    }
}

/// Maps `f` over `items` starting from `start`, degrading on pool breakage.
///
/// A heartbeat line with `done/total` is logged every `heartbeat` until the
/// batch finishes. Output order matches `items`.
pub fn map_degrading<T, R, F>(
    label: &str,
    items: &[T],
    workers: usize,
    heartbeat: Duration,
    start: PoolKind,
    f: F,
) -> Result<Vec<R>>
where
    T: Sync,
    R: Send,
    F: Fn(&T) -> Result<R> + Sync,
{
    let done = AtomicUsize::new(0);
    let counted = |item: &T| {
        let out = f(item);
        done.fetch_add(1, Ordering::Relaxed);
        out
    };
    let total = items.len();
    let (stop_tx, stop_rx) = mpsc::channel::<()>();

    thread::scope(|s| {
        s.spawn(|| {
            let stop_rx = stop_rx;
            while let Err(mpsc::RecvTimeoutError::Timeout) = stop_rx.recv_timeout(heartbeat) {
                tracing::info!(
                    "{}: {}/{} done",
                    label,
                    done.load(Ordering::Relaxed).min(total),
                    total
                );
            }
        });

        let mut kind = start;
        let result = loop {
            match attempt(kind, items, workers, &counted) {
                Attempt::Done(out) => break out,
                Attempt::Broken(reason) => match kind.next() {
                    Some(next) => {
                        tracing::warn!(
                            "{}: {:?} pool broke ({}), downgrading to {:?}",
                            label,
                            kind,
                            reason,
                            next
                        );
                        done.store(0, Ordering::Relaxed);
                        kind = next;
                    }
                    None => break Err(Error::WorkerPanicked(label.to_string())),
                },
            }
        };
        let _ = stop_tx.send(());
        result
    })
}
