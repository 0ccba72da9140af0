use clap::Parser;

use mediaflow_proxy::cli::{Cli, run};

fn main() -> anyhow::Result<()> {
    let output = run(Cli::parse())?;
    println!("{}", output);
    Ok(())
}
