//! Formatted terminal output for CLI commands.
//!
//! Progress goes to stderr; stack snapshots requested with `p` go to
//! stdout so they can be piped.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Instant;

use brewdock_runtime::stack::Stack;

const BOLD: &str = "\x1b[1m";
const DIM: &str = "\x1b[2m";
const GREEN: &str = "\x1b[32m";
const CYAN: &str = "\x1b[36m";
const RED: &str = "\x1b[31m";
const RESET: &str = "\x1b[0m";

pub fn print_header() {
    eprintln!();
    eprintln!("  {BOLD}brewdock{RESET} {DIM}v{}{RESET}", env!("CARGO_PKG_VERSION"));
    eprintln!();
}

pub fn print_step(message: &str) {
    eprintln!();
    eprintln!("  {message}");
}

pub fn print_done(message: &str) {
    eprintln!("  {GREEN}{message}{RESET}");
}

pub fn print_failure(message: &str) {
    eprintln!();
    eprintln!("  {RED}{BOLD}{message}{RESET}");
}

/// Summarizes a freshly built stack.
pub fn print_stack(stack: &Stack, started: Instant) {
    eprintln!();
    eprintln!(
        "  {GREEN}{BOLD}Started {}{RESET} container(s) on {BOLD}{}{RESET} in {:.1}s:",
        stack.components().len(),
        stack.network(),
        started.elapsed().as_secs_f64()
    );
    eprintln!();
    for component in stack.components() {
        eprintln!(
            "    {GREEN}●{RESET} {BOLD}{}{RESET} {DIM}[{}]{RESET} {}",
            component.name,
            short_id(component.container_id.as_str()),
            component.internal_ip
        );
        let ports = format_ports(&component.mapped_ports);
        if !ports.is_empty() {
            eprintln!("        {CYAN}ports:{RESET} {ports}");
        }
    }
}

pub fn print_controls(path: &Path) {
    eprintln!();
    eprintln!("  {DIM}Watching {}{RESET}", path.display());
    eprintln!(
        "  Press {BOLD}r{RESET} + Enter to reload, {BOLD}p{RESET} to print, \
         {BOLD}q{RESET} to quit, {BOLD}Ctrl+C{RESET} to stop."
    );
}

pub fn print_snapshot(snapshot: &str) {
    if snapshot.is_empty() {
        eprintln!("  {DIM}(no stack running){RESET}");
    } else {
        println!("{snapshot}");
    }
}

fn short_id(id: &str) -> &str {
    id.get(..12).unwrap_or(id)
}

/// Renders exposed ports as `5432/tcp->49153`, in port order.
fn format_ports(mapped: &BTreeMap<String, String>) -> String {
    mapped
        .iter()
        .map(|(port, host)| {
            if host.is_empty() {
                port.clone()
            } else {
                format!("{port}->{host}")
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}
