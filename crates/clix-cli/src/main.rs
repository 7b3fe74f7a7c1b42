//! `clix` entrypoint.
//!
//! Delegates to [`clix_cli::run`]; the script's exit status becomes the
//! process exit status.

use std::io;
use std::process::ExitCode;

fn main() -> ExitCode {
    let mut stdout = io::stdout();
    let mut stderr = io::stderr();
    clix_cli::run(std::env::args_os(), &mut stdout, &mut stderr)
}
