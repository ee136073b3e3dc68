//! One submission's worker across all pipeline stages.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde_json::Value;
use tracing::{info, instrument};

use super::protocol::CallOutcome;
use super::{CandidateWorker, Deadline, WorkerError, WorkerOptions};
use crate::manifest::Manifest;
use crate::sandbox::StatementExecutor;

static NEXT_MODULE: AtomicU64 = AtomicU64::new(1);

/// Owns the worker for one evaluation and remembers how it was set up, so a
/// worker killed by a timeout can be replaced by an equivalent one.
pub struct CandidateSession<'a> {
    options: WorkerOptions,
    manifest: &'a Manifest,
    request_timeout: Duration,
    module_name: String,
    worker: Option<CandidateWorker>,
    sandboxed: bool,
}

impl<'a> CandidateSession<'a> {
    pub fn new(options: WorkerOptions, manifest: &'a Manifest, request_timeout: Duration) -> Self {
        let serial = NEXT_MODULE.fetch_add(1, Ordering::Relaxed);
        Self {
            options,
            manifest,
            request_timeout,
            module_name: format!("candidate_crud_{serial}"),
            worker: None,
            sandboxed: false,
        }
    }

    pub fn module_name(&self) -> &str {
        &self.module_name
    }

    /// Start the worker and instantiate the CRUD class.
    pub fn load(&mut self) -> Result<(), WorkerError> {
        let deadline = self.request_deadline();
        let mut worker = CandidateWorker::spawn(&self.options, deadline)?;
        worker.load(
            &self.manifest.crud_module,
            &self.module_name,
            &self.manifest.crud_class,
            &deadline,
        )?;
        self.worker = Some(worker);
        Ok(())
    }

    pub fn methods(&mut self, names: &[&str]) -> Result<BTreeMap<String, bool>, WorkerError> {
        let deadline = self.request_deadline();
        self.running_worker()?.methods(names, &deadline)
    }

    /// Redirect the adapter's connection factory to sandbox connections.
    pub fn install_sandbox(&mut self) -> Result<(), WorkerError> {
        let deadline = self.request_deadline();
        let adapter = self.manifest.db_adapter.as_deref();
        let connect_fn = self.manifest.db_connect_fn.as_str();
        self.running_worker()?
            .install_sandbox(adapter, connect_fn, &deadline)?;
        self.sandboxed = true;
        Ok(())
    }

    pub fn call(
        &mut self,
        method: &str,
        args: &[Value],
        deadline: &Deadline,
        executor: &dyn StatementExecutor,
    ) -> Result<CallOutcome, WorkerError> {
        self.running_worker()?
            .call(method, args, deadline, executor)
    }

    /// Make sure a loaded, sandboxed worker is available, replacing one that
    /// died or was killed.
    #[instrument(skip_all, fields(module = %self.module_name))]
    pub fn ensure_running(&mut self) -> Result<(), WorkerError> {
        if self.worker.as_ref().is_some_and(CandidateWorker::is_running) {
            return Ok(());
        }
        if !self.sandboxed {
            return Err(WorkerError::Unavailable);
        }
        info!("restarting worker");
        if let Some(dead) = self.worker.take() {
            dead.shutdown();
        }
        self.load()?;
        self.install_sandbox()
    }

    pub fn shutdown(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.shutdown();
        }
    }

    fn running_worker(&mut self) -> Result<&mut CandidateWorker, WorkerError> {
        match self.worker.as_mut() {
            Some(worker) if worker.is_running() => Ok(worker),
            _ => Err(WorkerError::Unavailable),
        }
    }

    fn request_deadline(&self) -> Deadline {
        Deadline::after(self.request_timeout)
    }
}

impl Drop for CandidateSession<'_> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
