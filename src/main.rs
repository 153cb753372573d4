//! Pelter CLI: fuzz one URL with values from a range or a wordlist.

use anyhow::Result;
use clap::Parser;
use pelter::engine::arg_parser::Cli;
use pelter::engine::handle_run;
use std::time::Instant;

fn main() -> Result<()> {
    let start_time = Instant::now();
    let cli = Cli::parse();
    handle_run(&cli)?;
    log::debug!("Total time: {:?}", start_time.elapsed());
    Ok(())
}
