//! Intake server binary.
//! Run with: cargo run --bin intake-server

use std::process::ExitCode;

use intake_handoff::start_intake_server;

fn main() -> ExitCode {
    start_intake_server::run()
}
