use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rollcall_core::{
    AttendanceEvent, AttendanceLedger, AttendanceStatus, MarkOutcome, Schedule, SessionClock,
    SystemClock, WindowPhase, TIMESTAMP_FORMAT,
};
use rollcall_hw::Camera;
use rollcall_store::{default_db_path, EventFilter, SqliteStore, SubjectSummary};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "rollcall", about = "Rollcall attendance CLI")]
struct Cli {
    /// Attendance database (default: $ROLLCALL_DB_PATH or the XDG data dir)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List recorded attendance
    Report {
        #[arg(short, long)]
        subject: Option<String>,
        #[arg(short, long)]
        person: Option<String>,
        /// present, absent or late
        #[arg(long)]
        status: Option<AttendanceStatus>,
        /// Per-subject totals instead of individual events
        #[arg(long)]
        summary: bool,
        #[arg(long)]
        json: bool,
    },
    /// List saved best frames
    Frames {
        #[arg(short, long)]
        subject: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Record attendance by hand
    Mark {
        person: String,
        subject: String,
        #[arg(long, default_value = "present")]
        status: AttendanceStatus,
    },
    /// Validate a session schedule and show where today stands
    Schedule {
        #[arg(default_value = "sessions.json")]
        file: PathBuf,
    },
    /// List V4L2 capture devices
    Devices,
    /// Grab one frame from a camera
    Probe {
        #[arg(short, long, default_value = "/dev/video0")]
        device: String,
        #[arg(long, default_value_t = 640)]
        width: u32,
        #[arg(long, default_value_t = 480)]
        height: u32,
        #[arg(long, default_value_t = 4)]
        warmup: usize,
        /// Write the frame to this image file
        #[arg(long)]
        save: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let db_path = cli
        .db
        .or_else(|| std::env::var_os("ROLLCALL_DB_PATH").map(PathBuf::from))
        .unwrap_or_else(default_db_path);

    match cli.command {
        Commands::Report {
            subject,
            person,
            status,
            summary,
            json,
        } => {
            let store = open_store(&db_path)?;
            if summary {
                let rows = store.summary()?;
                if json {
                    println!("{}", serde_json::to_string_pretty(&rows)?);
                } else if rows.is_empty() {
                    println!("No attendance recorded");
                } else {
                    for line in summary_lines(&rows) {
                        println!("{line}");
                    }
                }
                return Ok(());
            }

            let events = store.events(&EventFilter {
                subject,
                person,
                status,
            })?;
            if json {
                println!("{}", serde_json::to_string_pretty(&events)?);
            } else if events.is_empty() {
                println!("No matching attendance events");
            } else {
                for event in &events {
                    println!("{}", event_line(event));
                }
            }
        }
        Commands::Frames { subject, json } => {
            let store = open_store(&db_path)?;
            let frames = store.frames(subject.as_deref())?;
            if json {
                println!("{}", serde_json::to_string_pretty(&frames)?);
            } else if frames.is_empty() {
                println!("No frames saved");
            } else {
                for f in &frames {
                    println!(
                        "{}  {:<16} {:>3} faces  {}",
                        f.captured_at.format(TIMESTAMP_FORMAT),
                        f.subject,
                        f.face_count,
                        f.image_path
                    );
                }
            }
        }
        Commands::Mark {
            person,
            subject,
            status,
        } => {
            let store = open_store(&db_path)?;
            let mut ledger =
                AttendanceLedger::initialize(store).context("loading prior attendance")?;
            let now = chrono::Local::now().naive_local();
            match ledger.mark_other(person.trim(), subject.trim(), status, now)? {
                MarkOutcome::Marked => println!("Recorded {person} as {status} for {subject}"),
                MarkOutcome::AlreadyMarked => {
                    println!("{person} is already marked present for {subject}")
                }
            }
        }
        Commands::Schedule { file } => {
            let schedule = Schedule::load(&file)
                .with_context(|| format!("invalid schedule {}", file.display()))?;
            let clock = SessionClock::new(SystemClock, std::time::Duration::from_secs(10));
            println!("{} session(s) in {}", schedule.len(), file.display());
            for session in schedule.sessions() {
                println!(
                    "  {}-{}  {:<16} {}",
                    session.start().format("%H:%M"),
                    session.end().format("%H:%M"),
                    session.subject(),
                    phase_label(clock.phase(session))
                );
            }
        }
        Commands::Devices => {
            let devices = Camera::list_devices();
            if devices.is_empty() {
                println!("No V4L2 capture devices found");
            }
            for d in devices {
                println!("{}  {} ({}, {})", d.path, d.name, d.driver, d.bus);
            }
        }
        Commands::Probe {
            device,
            width,
            height,
            warmup,
            save,
        } => {
            let mut camera = Camera::open(&device, width, height)
                .with_context(|| format!("opening {device}"))?;
            camera.discard_frames(warmup);
            let frame = camera.capture_frame().context("capturing frame")?;
            println!(
                "{}: {}x{} {:?}, brightness {:.1}{}",
                device,
                frame.width,
                frame.height,
                camera.pixel_format(),
                frame.avg_brightness(),
                if frame.is_dark { " (dark)" } else { "" }
            );
            if let Some(path) = save {
                let image = frame
                    .to_image()
                    .context("frame does not match its dimensions")?;
                image
                    .save(&path)
                    .with_context(|| format!("writing {}", path.display()))?;
                println!("Saved {}", path.display());
            }
            camera.close();
        }
    }

    Ok(())
}

fn open_store(path: &std::path::Path) -> Result<SqliteStore> {
    SqliteStore::open(path).with_context(|| format!("opening {}", path.display()))
}

fn event_line(event: &AttendanceEvent) -> String {
    format!(
        "{}  {:<7} {:<16} {}",
        event.timestamp.format(TIMESTAMP_FORMAT),
        event.status.as_str(),
        event.subject,
        event.person
    )
}

fn summary_lines(rows: &[SubjectSummary]) -> Vec<String> {
    rows.iter()
        .map(|r| {
            format!(
                "{:<16} present {:>3}  late {:>3}  absent {:>3}",
                r.subject, r.present, r.late, r.absent
            )
        })
        .collect()
}

fn phase_label(phase: WindowPhase) -> &'static str {
    match phase {
        WindowPhase::Before => "upcoming",
        WindowPhase::Inside => "in progress",
        WindowPhase::After => "over",
    }
}
