use anyhow::{Context, Result};
use rollcall_core::{
    AttendanceLedger, FaceSampler, RunControl, Schedule, SessionClock, SessionExit,
    SessionOutcome, SessionRunner, SystemClock,
};
use rollcall_hw::CameraDevice;
use rollcall_store::SqliteStore;
use rollcall_vision::{FacePipeline, Gallery};
use tokio::sync::oneshot;
use tracing_subscriber::EnvFilter;

mod archive;
mod config;
mod engine;
mod signals;

use archive::EvidenceArchive;
use config::Config;
use engine::VisionEngine;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = Config::from_env();
    tracing::info!(
        sessions = %config.sessions_path.display(),
        camera = %config.camera_device,
        db = %config.db_path.display(),
        "rollcalld starting"
    );

    let schedule = Schedule::load(&config.sessions_path)
        .with_context(|| format!("loading {}", config.sessions_path.display()))?;
    if schedule.is_empty() {
        tracing::warn!("schedule has no sessions; nothing to do");
        return Ok(());
    }

    let control = RunControl::new();
    signals::watch_ctrl_c(control.clone());
    signals::watch_stdin(control.clone());

    // Models, camera and database all block; the runner gets its own thread.
    let (reply_tx, reply_rx) = oneshot::channel();
    std::thread::Builder::new()
        .name("rollcall-runner".into())
        .spawn(move || {
            let result = run(&config, &schedule, control);
            let _ = reply_tx.send(result);
        })
        .context("failed to spawn runner thread")?;

    let outcomes = reply_rx.await.context("runner thread exited")??;
    let marked: usize = outcomes.iter().map(|o| o.marked.len()).sum();
    let completed = outcomes
        .iter()
        .filter(|o| o.exit == SessionExit::WindowClosed)
        .count();
    tracing::info!(
        sessions = outcomes.len(),
        completed,
        marked,
        "rollcalld finished"
    );
    Ok(())
}

fn run(config: &Config, schedule: &Schedule, control: RunControl) -> Result<Vec<SessionOutcome>> {
    let mut pipeline = FacePipeline::load(&config.model_dir)
        .with_context(|| format!("loading models from {}", config.model_dir.display()))?;
    let gallery = Gallery::build(&config.gallery_dir, &mut pipeline)
        .with_context(|| format!("loading gallery {}", config.gallery_dir.display()))?;
    if gallery.is_empty() {
        tracing::warn!(dir = %config.gallery_dir.display(), "gallery is empty; nobody can be recognized");
    }
    let roster = if config.mark_absent {
        gallery.labels()
    } else {
        Vec::new()
    };

    let store = SqliteStore::open(&config.db_path)
        .with_context(|| format!("opening {}", config.db_path.display()))?;
    let ledger = AttendanceLedger::initialize(store.clone()).context("loading prior attendance")?;
    tracing::info!(already_marked = ledger.len(), "attendance ledger ready");

    let camera = CameraDevice {
        path: config.camera_device.clone(),
        width: config.frame_width,
        height: config.frame_height,
        warmup_frames: config.warmup_frames,
    };

    let mut runner = SessionRunner::new(
        SessionClock::new(SystemClock, config.poll_interval),
        camera,
        FaceSampler::new(VisionEngine::new(pipeline, gallery, config.similarity_threshold)),
        ledger,
        EvidenceArchive::new(&config.capture_dir, store),
        control,
    )
    .with_absent_roster(roster);

    let outcomes = runner.run_schedule(schedule);
    if runner.sampler().failures() > 0 {
        tracing::warn!(
            failures = runner.sampler().failures(),
            "some frames could not be analyzed"
        );
    }
    Ok(outcomes)
}
