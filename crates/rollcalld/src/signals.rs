use rollcall_core::RunControl;
use std::io::BufRead;

/// Ctrl-C ends the current session and the rest of the schedule.
pub fn watch_ctrl_c(control: RunControl) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("interrupt received, shutting down after this session");
                control.shutdown.raise();
                control.session_stop.raise();
            }
            Err(e) => tracing::warn!(error = %e, "cannot listen for ctrl-c"),
        }
    });
}

/// A `q` line on stdin ends the current session; the schedule continues.
///
/// Runs on a detached thread: a blocking stdin read must not hold the
/// runtime open at exit.
pub fn watch_stdin(control: RunControl) {
    let spawned = std::thread::Builder::new()
        .name("rollcall-stdin".into())
        .spawn(move || watch_lines(std::io::stdin().lock(), &control));
    if let Err(e) = spawned {
        tracing::warn!(error = %e, "cannot watch stdin for stop requests");
    }
}

fn watch_lines(input: impl BufRead, control: &RunControl) {
    for line in input.lines() {
        match line {
            Ok(line) if is_quit(&line) => {
                tracing::info!("stop requested from console");
                control.session_stop.raise();
            }
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(error = %e, "stdin closed");
                break;
            }
        }
    }
}

fn is_quit(line: &str) -> bool {
    line.trim().eq_ignore_ascii_case("q")
}
