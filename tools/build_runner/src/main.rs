use archive_core::adapters::fs::{FsAgentOutbox, FsDurableStore, FsObjectSource, FsTicketOutbox};
use archive_core::adapters::interface::ObjectSource;
use archive_core::archive::controller::{BuildController, BuildServices};
use archive_core::audit::log::AuditLog;
use archive_core::config::ReliabilityConfig;
use archive_core::error::{CoreError, CoreResult};
use archive_core::model::build::{ArchiveObject, BuildStatus};
use archive_core::storage::records::RecordStore;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Build request read from the manifest file. `build_id` resumes an existing
/// build instead of requesting a new one.
#[derive(Debug, Deserialize)]
struct Manifest {
    request_id: String,
    tenant_id: String,
    objects: Vec<ArchiveObject>,
    #[serde(default)]
    build_id: Option<String>,
}

struct Paths {
    config: PathBuf,
    source_root: PathBuf,
    durable_root: PathBuf,
    state_root: PathBuf,
    manifest: PathBuf,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 6 {
        eprintln!(
            "usage: build_runner <config.json> <source_root> <durable_root> <state_root> <manifest.json>"
        );
        std::process::exit(2);
    }
    let paths = Paths {
        config: PathBuf::from(&args[1]),
        source_root: PathBuf::from(&args[2]),
        durable_root: PathBuf::from(&args[3]),
        state_root: PathBuf::from(&args[4]),
        manifest: PathBuf::from(&args[5]),
    };

    match run(&paths) {
        Ok(status) if status == BuildStatus::FAILED => std::process::exit(1),
        Ok(_) => std::process::exit(0),
        Err(e) => {
            eprintln!("build_runner error: {}", e);
            std::process::exit(1);
        }
    }
}

fn run(paths: &Paths) -> CoreResult<BuildStatus> {
    let cfg = ReliabilityConfig::from_json_file(&paths.config)?.apply_env_overrides()?;
    let manifest: Manifest = serde_json::from_slice(&std::fs::read(&paths.manifest)?)?;

    let source = Arc::new(FsObjectSource::new(&paths.source_root));
    preflight(source.as_ref(), &manifest.objects)?;

    let store = RecordStore::open_or_create(&paths.state_root)?;
    let audit = AuditLog::open_or_create(paths.state_root.join("audit").join("builds.ndjson"))?;
    let services = BuildServices {
        source,
        durable: Arc::new(FsDurableStore::new(&paths.durable_root)),
        ticketing: Arc::new(FsTicketOutbox::open_or_create(
            paths.state_root.join("tickets"),
        )?),
        dispatcher: Arc::new(FsAgentOutbox::open_or_create(
            paths.state_root.join("agent_requests"),
        )?),
    };
    info!(
        state_root = %store.root().display(),
        audit_log = %audit.path().display(),
        chunk_size = cfg.chunk_size,
        "build runner ready"
    );
    let mut controller =
        BuildController::new(cfg, store, audit, scratch_dir(&paths.state_root), services)?;

    let build_id = match manifest.build_id {
        Some(id) => {
            info!(build_id = %id, "resuming build");
            id
        }
        None => {
            controller
                .request(&manifest.request_id, &manifest.tenant_id, manifest.objects)?
                .build_id
        }
    };

    let current = controller.view(&build_id)?;
    let attempt = if current.status == BuildStatus::FAILED {
        controller.regenerate(&build_id)
    } else {
        controller.build(&build_id)
    };
    match attempt {
        Ok(outcome) => {
            if let Some(err) = &outcome.error {
                warn!(build_id = %build_id, error = %err, "attempt failed");
            }
        }
        Err(e @ CoreError::RegenerateRejected(_)) => {
            warn!(build_id = %build_id, error = %e, "build is escalated, not retrying");
        }
        Err(e) => return Err(e),
    }
    let view = controller.view(&build_id)?;
    println!("{}", serde_json::to_string_pretty(&view)?);
    Ok(view.status)
}

fn scratch_dir(state_root: &Path) -> PathBuf {
    state_root.join("scratch")
}

/// Missing keys are reported up front; the build itself decides whether they
/// fail the attempt.
fn preflight(source: &dyn ObjectSource, objects: &[ArchiveObject]) -> CoreResult<()> {
    let mut missing = 0usize;
    for o in objects {
        if !source.exists(&o.key)? {
            warn!(key = %o.key, entry = %o.entry_name, "object not found in source");
            missing += 1;
        }
    }
    if missing > 0 {
        warn!(missing, total = objects.len(), "manifest references missing objects");
    }
    Ok(())
}
