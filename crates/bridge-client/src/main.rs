//! Entrypoint for the `bridge` client binary.
//!
//! Delegates to [`bridge_client::run`], which parses arguments, opens a
//! session against the configured host and prints the rendered result.

use std::io::{self, StderrLock, StdoutLock};
use std::process::ExitCode;

fn main() -> ExitCode {
    let mut stdout: StdoutLock<'_> = io::stdout().lock();
    let mut stderr: StderrLock<'_> = io::stderr().lock();
    bridge_client::run(std::env::args_os(), &mut stdout, &mut stderr)
}
