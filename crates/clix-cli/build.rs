//! Build script: render the `clix(1)` manual page into `OUT_DIR`.

use clap::CommandFactory;
use clap_mangen::Man;
use std::{env, fs, path::PathBuf};

#[path = "src/cli.rs"]
mod cli;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("cargo:rerun-if-changed=src/cli.rs");
    println!("cargo:rerun-if-env-changed=CARGO_PKG_VERSION");

    let cmd = cli::Cli::command();
    let version = env::var("CARGO_PKG_VERSION").map_err(
        |_| "CARGO_PKG_VERSION must be set by Cargo; cannot render manual page without it.",
    )?;
    let out_dir = env::var_os("OUT_DIR")
        .map(PathBuf::from)
        .ok_or("OUT_DIR must be set by Cargo")?;

    let man = Man::new(cmd).section("1").source(format!("clix {version}"));
    let mut buf = Vec::new();
    man.render(&mut buf)?;
    fs::write(out_dir.join("clix.1"), buf)?;
    Ok(())
}
