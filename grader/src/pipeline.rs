//! The gated check sequence for one submission.
//!
//! File checks always run. Import, method presence and sandboxing are
//! prerequisites: the first one to fail ends the run. The functional,
//! injection and style checks then run as a trailing group, each attempted
//! regardless of how the others went.

use std::path::Path;

use tracing::{debug, info, instrument, warn};

use crate::checks::functional::{self, FunctionalOptions};
use crate::checks::style;
use crate::checks::{
    REQUIRED_METHODS, WEIGHT_ADAPTER_EXISTS, WEIGHT_FUNCTIONAL, WEIGHT_IMPORT, WEIGHT_INJECTION,
    WEIGHT_METHOD, WEIGHT_MODULE_EXISTS, WEIGHT_SANDBOX, WEIGHT_STYLE, injection,
};
use crate::config::GraderConfig;
use crate::manifest::Manifest;
use crate::report::Report;
use crate::sandbox::SandboxProvider;
use crate::score::Score;
use crate::worker::{CandidateSession, WorkerOptions};

/// Evaluate the submission rooted at `root`.
///
/// Never fails: manifest problems become an error report, everything else a
/// failed check.
#[instrument(skip_all, fields(root = %root.display()))]
pub fn evaluate(root: &Path, config: &GraderConfig) -> Report {
    let manifest = match Manifest::load(root) {
        Ok(manifest) => manifest,
        Err(err) => {
            warn!(err = %err, "manifest rejected");
            return Report::error(err.to_string());
        }
    };
    let score = run_pipeline(root, &manifest, config);
    info!(
        score = score.earned(),
        max_score = score.total(),
        "evaluation finished"
    );
    Report::finalize(score)
}

/// Run every applicable check against a loaded manifest.
pub fn run_pipeline(root: &Path, manifest: &Manifest, config: &GraderConfig) -> Score {
    let mut score = Score::new();

    let module_found = root.join(&manifest.crud_module).is_file();
    score.add(
        WEIGHT_MODULE_EXISTS,
        module_found,
        "CRUD module found",
        "CRUD module missing",
    );
    let adapter_found = manifest
        .db_adapter
        .as_ref()
        .is_some_and(|adapter| root.join(adapter).is_file());
    score.add(
        WEIGHT_ADAPTER_EXISTS,
        adapter_found,
        "DB adapter file found",
        "DB adapter file missing",
    );
    if !module_found {
        debug!("CRUD module missing, halting");
        return score;
    }

    let options = WorkerOptions {
        python: config.python.clone(),
        root: root.to_path_buf(),
        stderr_limit_bytes: config.output_limit_bytes,
    };
    let mut session = CandidateSession::new(options, manifest, config.worker_timeout());

    if !import_stage(&mut session, &mut score)
        || !methods_stage(&mut session, &mut score)
        || !sandbox_stage(&mut session, &mut score)
    {
        session.shutdown();
        return score;
    }

    let provider = SandboxProvider::with_limits(config.result_limits());
    functional_stage(&mut session, manifest, &provider, config, &mut score);
    injection_stage(&mut session, manifest, &provider, config, &mut score);
    session.shutdown();
    style_stage(root, manifest, config, &mut score);
    score
}

#[instrument(skip_all)]
fn import_stage(session: &mut CandidateSession<'_>, score: &mut Score) -> bool {
    let failure = session.load().err().map(|err| {
        debug!(diagnostic = %err.diagnostic(), "import failed");
        format!("Failed to load CRUD class: {err}")
    });
    let loaded = failure.is_none();
    score.add(
        WEIGHT_IMPORT,
        loaded,
        "CRUD class imported successfully",
        failure.unwrap_or_default(),
    );
    loaded
}

#[instrument(skip_all)]
fn methods_stage(session: &mut CandidateSession<'_>, score: &mut Score) -> bool {
    let present = match session.methods(&REQUIRED_METHODS) {
        Ok(present) => present,
        Err(err) => {
            warn!(err = %err, "method probe failed");
            Default::default()
        }
    };
    let mut complete = true;
    for method in REQUIRED_METHODS {
        let found = present.get(method).copied().unwrap_or(false);
        complete &= found;
        score.add(
            WEIGHT_METHOD,
            found,
            format!("Method {method}() found"),
            format!("Method {method}() missing"),
        );
    }
    complete
}

#[instrument(skip_all)]
fn sandbox_stage(session: &mut CandidateSession<'_>, score: &mut Score) -> bool {
    let failure = session
        .install_sandbox()
        .err()
        .map(|err| format!("Unable to sandbox database calls: {err}"));
    let sandboxed = failure.is_none();
    score.add(
        WEIGHT_SANDBOX,
        sandboxed,
        "Database connection successfully sandboxed",
        failure.unwrap_or_default(),
    );
    sandboxed
}

#[instrument(skip_all)]
fn functional_stage(
    session: &mut CandidateSession<'_>,
    manifest: &Manifest,
    provider: &SandboxProvider,
    config: &GraderConfig,
    score: &mut Score,
) {
    let options = FunctionalOptions {
        stage_timeout: config.stage_timeout(),
        strict_read: config.strict_read,
    };
    let failure = functional::run(session, manifest, provider, &options)
        .err()
        .map(|err| format!("CRUD functional test failed: {err:#}"));
    score.add(
        WEIGHT_FUNCTIONAL,
        failure.is_none(),
        "CRUD operations successfully executed",
        failure.unwrap_or_default(),
    );
}

#[instrument(skip_all)]
fn injection_stage(
    session: &mut CandidateSession<'_>,
    manifest: &Manifest,
    provider: &SandboxProvider,
    config: &GraderConfig,
    score: &mut Score,
) {
    let failure = match injection::run(session, manifest, provider, config.stage_timeout()) {
        Ok(true) => None,
        Ok(false) => Some("SQL injection vulnerability detected".to_string()),
        Err(err) => Some(format!("SQL injection probe failed: {err:#}")),
    };
    score.add(
        WEIGHT_INJECTION,
        failure.is_none(),
        "SQL injection protection appears safe",
        failure.unwrap_or_default(),
    );
}

#[instrument(skip_all)]
fn style_stage(root: &Path, manifest: &Manifest, config: &GraderConfig, score: &mut Score) {
    let failure = match style::run(
        root,
        &manifest.crud_module,
        &config.linter,
        config.style_timeout(),
        config.output_limit_bytes,
    ) {
        Ok(verdict) => verdict.failure(),
        Err(err) => Some(format!("Code style check failed: {err:#}")),
    };
    score.add(
        WEIGHT_STYLE,
        failure.is_none(),
        "Code is PEP8 clean",
        failure.unwrap_or_default(),
    );
}
