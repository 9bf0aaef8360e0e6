use clap::Parser;
use color_eyre::Result;
use pilot::daemon::{cli::CliArguments, run};

#[tokio::main(flavor = "multi_thread", worker_threads = 4)]
async fn main() -> Result<()> {
    // Parse commandline options.
    let opt = CliArguments::parse();

    // Init the logger and set the verbosity level depending on the `-v` flags.
    pilot::tracing::install_tracing(opt.verbose)?;
    color_eyre::install()?;

    run(opt.config, opt.profile, false).await
}
