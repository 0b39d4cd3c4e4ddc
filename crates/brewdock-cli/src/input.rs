//! Interactive commands read from stdin.

use std::io::BufRead;

use brewdock_runtime::supervisor::ControlEvent;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Maps one input line to a control event.
#[must_use]
pub fn parse_command(line: &str) -> Option<ControlEvent> {
    match line.trim().to_ascii_lowercase().as_str() {
        "r" | "reload" => Some(ControlEvent::Reload),
        "p" | "print" => Some(ControlEvent::Print),
        "q" | "quit" | "exit" => Some(ControlEvent::Quit),
        _ => None,
    }
}

/// Reads commands from stdin on a dedicated thread until quit, end of
/// input, or cancellation.
///
/// A blocking read cannot be interrupted, so the thread is detached and
/// ends with the process.
pub fn spawn(events: mpsc::Sender<ControlEvent>, cancel: CancellationToken) {
    let _ = std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            if cancel.is_cancelled() {
                break;
            }
            let Ok(line) = line else { break };
            match parse_command(&line) {
                Some(event) => {
                    let quit = event == ControlEvent::Quit;
                    if events.blocking_send(event).is_err() || quit {
                        break;
                    }
                }
                None if line.trim().is_empty() => {}
                None => tracing::warn!(input = %line.trim(), "unknown command, use r, p or q"),
            }
        }
    });
}
