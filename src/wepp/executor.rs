//! Bounded fan-out of engine invocations.
//!
//! Workers pull invocations off a shared index. The first failure sets the
//! cancel flag: workers stop picking up new invocations and running engines
//! abandon their process. The caller waits on the result channel with a
//! heartbeat timeout and logs progress on every tick.

use crate::error::{Error, IoContext, Result};
use crate::providers::{EngineInvocation, WeppEngine};
use indicatif::{ProgressBar, ProgressStyle};
use std::fs;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

/// Marker the engine prints after a successful run.
pub const COMPLETION_BANNER: &str = "WEPP COMPLETED";

pub struct Executor<'a> {
    pub engine: &'a dyn WeppEngine,
    pub workers: usize,
    pub heartbeat: Duration,
    /// Treat a run whose log lacks [`COMPLETION_BANNER`] as failed.
    pub require_banner: bool,
    pub progress: bool,
}

impl Executor<'_> {
    fn run_one(&self, invocation: &EngineInvocation, cancel: &AtomicBool) -> Result<()> {
        self.engine.run(invocation, cancel)?;
        if self.require_banner {
            let log = fs::read_to_string(&invocation.log_file).at(&invocation.log_file)?;
            if !log.contains(COMPLETION_BANNER) {
                return Err(Error::Simulator {
                    label: invocation.label.clone(),
                    run_file: invocation.run_file.clone(),
                    status: None,
                });
            }
        }
        Ok(())
    }

    /// Runs a single invocation on the calling thread.
    pub fn run_single(&self, invocation: &EngineInvocation) -> Result<()> {
        let cancel = AtomicBool::new(false);
        tracing::info!(label = %invocation.label, "running {}", invocation.run_file.display());
        self.run_one(invocation, &cancel)
    }

    /// Runs every invocation; returns after all have finished or the batch
    /// was cancelled by a failure.
    pub fn run_all(&self, label: &str, invocations: &[EngineInvocation]) -> Result<()> {
        let total = invocations.len();
        if total == 0 {
            return Ok(());
        }
        let workers = self.workers.clamp(1, total);
        let cancel = AtomicBool::new(false);
        let next = AtomicUsize::new(0);
        let (tx, rx) = mpsc::channel::<(usize, Result<()>)>();

        let pb = if self.progress {
            let pb = ProgressBar::new(total as u64);
            if let Ok(style) = ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg} ({eta})")
            {
                pb.set_style(style.progress_chars("#>-"));
            }
            pb.set_message(label.to_string());
            pb
        } else {
            ProgressBar::hidden()
        };

        tracing::info!(workers, total, "{}: starting", label);
        let mut first_error: Option<Error> = None;
        thread::scope(|s| {
            for _ in 0..workers {
                let tx = tx.clone();
                let (cancel, next) = (&cancel, &next);
                s.spawn(move || {
                    loop {
                        if cancel.load(Ordering::SeqCst) {
                            break;
                        }
                        let i = next.fetch_add(1, Ordering::SeqCst);
                        let Some(invocation) = invocations.get(i) else {
                            break;
                        };
                        let result = self.run_one(invocation, cancel);
                        if result.is_err() {
                            cancel.store(true, Ordering::SeqCst);
                        }
                        if tx.send((i, result)).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(tx);

            let mut done = 0;
            loop {
                match rx.recv_timeout(self.heartbeat) {
                    Ok((_, Ok(()))) => {
                        done += 1;
                        pb.inc(1);
                    }
                    Ok((i, Err(e))) => {
                        let replace = match &first_error {
                            None => true,
                            Some(Error::Cancelled) => !matches!(e, Error::Cancelled),
                            Some(_) => false,
                        };
                        if !matches!(e, Error::Cancelled) {
                            tracing::error!(label = %invocations[i].label, "{}", e);
                        }
                        if replace {
                            first_error = Some(e);
                        }
                    }
                    Err(mpsc::RecvTimeoutError::Timeout) => {
                        tracing::info!("{}: {}/{} complete", label, done, total);
                    }
                    Err(mpsc::RecvTimeoutError::Disconnected) => break,
                }
            }
        });
        pb.finish_and_clear();

        match first_error {
            Some(e) => {
                tracing::error!("{}: cancelled remaining runs", label);
                Err(e)
            }
            None => {
                tracing::info!("{}: {} runs complete", label, total);
                Ok(())
            }
        }
    }
}
