use anyhow::Result;
use clap::Parser;

fn main() -> Result<()> {
    let cli = cromwell_operend_cli::Cli::parse();
    cromwell_operend_cli::run_cli(cli)
}
