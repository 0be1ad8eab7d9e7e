//! Submission, launch retry and shutdown drain.
//!
//! [`Engine::submit`] claims a worker slot, then starts one probe task that
//! owns the slot until it finishes. If the task cannot be started the slot
//! is given back and the launch is retried a bounded number of times.
//! [`Engine::drain`] consumes the engine and returns once every slot is
//! free, so nothing can be submitted after it starts.

use crate::action::{ActionRunner, NoAction};
use crate::admission::AdmissionController;
use crate::counters::{CounterSnapshot, Counters};
use crate::error::{ConfigError, LaunchError};
use crate::protocol::{probe_address, ProbeContext, ProbeOutcome};
use crate::socket::descriptor_floor;
use crate::types::{EngineConfig, ProbeSpec, ScanMode};
use futures::future::{BoxFuture, FutureExt};
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

/// Starts a probe task on some unit of concurrency.
///
/// On error the task must be dropped without being polled; that releases
/// the worker slot it carries.
pub trait Launcher: Send + Sync {
    fn launch(&self, task: BoxFuture<'static, ()>) -> Result<(), LaunchError>;
}

/// Spawns onto the tokio runtime the caller is running on.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioLauncher;

impl Launcher for TokioLauncher {
    fn launch(&self, task: BoxFuture<'static, ()>) -> Result<(), LaunchError> {
        let handle = Handle::try_current().map_err(|e| LaunchError::new(e.to_string()))?;
        handle.spawn(task);
        Ok(())
    }
}

/// What happened to one submitted address.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Submission {
    /// A probe task is running on `slot`.
    Launched { slot: usize },
    /// Every launch attempt failed; the address was not probed.
    Dropped,
}

pub struct Engine {
    ctx: Arc<ProbeContext>,
    admission: AdmissionController,
    launcher: Arc<dyn Launcher>,
    counters: Arc<Counters>,
}

impl Engine {
    /// Validates `config` and prepares an engine that probes every address
    /// with `specs`, in order.
    pub fn new(specs: Vec<ProbeSpec>, config: EngineConfig, mode: ScanMode) -> Result<Self, ConfigError> {
        config.validate()?;
        check_ceiling(config.max_sockets)?;
        let counters = Arc::new(Counters::new());
        let admission = AdmissionController::new(config.workers, counters.clone());
        let ctx = ProbeContext::new(specs.into(), config, mode, counters.clone(), Arc::new(NoAction));
        Ok(Self {
            ctx: Arc::new(ctx),
            admission,
            launcher: Arc::new(TokioLauncher),
            counters,
        })
    }

    pub fn with_action(mut self, action: Arc<dyn ActionRunner>) -> Self {
        self.rebuild_context(action);
        self
    }

    pub fn with_launcher(mut self, launcher: Arc<dyn Launcher>) -> Self {
        self.launcher = launcher;
        self
    }

    fn rebuild_context(&mut self, action: Arc<dyn ActionRunner>) {
        let ctx = self.ctx.clone();
        self.ctx = Arc::new(ProbeContext::new(
            ctx.specs.clone(),
            ctx.config.clone(),
            ctx.mode,
            ctx.counters.clone(),
            action,
        ));
    }

    pub fn counters(&self) -> Arc<Counters> {
        self.counters.clone()
    }

    pub fn admission(&self) -> &AdmissionController {
        &self.admission
    }

    pub fn mode(&self) -> ScanMode {
        self.ctx.mode
    }

    /// Starts probing `address`, waiting for a free worker slot first.
    ///
    /// Returns once the probe task is running, not when it finishes.
    pub async fn submit(&self, address: &str) -> Submission {
        let cfg = &self.ctx.config;
        let mut retries_left = cfg.launch_retries;
        loop {
            if cfg.pacing {
                tokio::time::sleep(cfg.pause).await;
            }
            let slot = self.admission.acquire().await;
            let slot_id = slot.id();
            let last_slot = slot_id + 1 == self.admission.capacity();

            let ctx = self.ctx.clone();
            let owned = address.to_string();
            let task = async move {
                let _slot = slot;
                let outcome = probe_address(&ctx, &owned).await;
                if let ProbeOutcome::Aborted { spec, phase } = outcome {
                    debug!(address = %owned, spec, %phase, "probe aborted");
                }
            }
            .boxed();

            let err = match self.launcher.launch(task) {
                Ok(()) => return Submission::Launched { slot: slot_id },
                Err(e) => e,
            };
            Counters::bump(&self.counters.launch_failures);
            if retries_left == 0 {
                Counters::bump(&self.counters.dropped);
                warn!(%address, error = %err, "giving up on address");
                return Submission::Dropped;
            }
            retries_left -= 1;
            debug!(%address, slot = slot_id, retries_left, error = %err, "launch failed, retrying");
            let backoff = if last_slot { cfg.connect_timeout } else { cfg.pause };
            tokio::time::sleep(backoff).await;
        }
    }

    /// Waits for every running probe to finish and returns the final counters.
    pub async fn drain(self) -> CounterSnapshot {
        info!(active = self.admission.active(), "waiting for in-flight probes");
        self.admission.drain().await;
        let Engine { ctx, counters, .. } = self;
        drop(ctx);
        info!("all probes finished");
        counters.snapshot()
    }
}

/// Rejects a socket ceiling that no new descriptor could ever fall under.
fn check_ceiling(max_sockets: usize) -> Result<(), ConfigError> {
    match descriptor_floor() {
        Ok(floor) if max_sockets <= floor => Err(ConfigError::Ceiling { max_sockets, floor }),
        Ok(_) => Ok(()),
        // out of descriptors right now; allocation keeps retrying
        Err(e) => {
            warn!(error = %e, "could not read descriptor floor");
            Ok(())
        }
    }
}
