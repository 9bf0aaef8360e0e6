use clap::Parser;
use color_eyre::{
    eyre::{bail, WrapErr},
    Result,
};
use pilot::client::{
    cli::{CliArguments, SubCommand},
    client::Client,
    handle_command,
};
use pilot_lib::settings::Settings;

/// This is the main entry point of the client.
///
/// At first we do some basic setup:
/// - Parse the cli
/// - Initialize logging
/// - Read the config
///
/// Once all this is done, we connect to the daemon and run the requested command.
#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // Parse commandline options.
    let opt = CliArguments::parse();

    // Init the logger and set the verbosity level depending on the `-v` flags.
    pilot::tracing::install_tracing(opt.verbose)?;
    color_eyre::install()?;

    // Try to read settings from the configuration file.
    let (mut settings, config_found) =
        Settings::read(&opt.config).wrap_err("Failed to read configuration.")?;

    // Load any requested profile.
    if let Some(profile) = &opt.profile {
        settings.load_profile(profile)?;
    }

    // Error if no configuration file can be found, as this is an indicator, that the daemon hasn't
    // been started yet.
    if !config_found {
        bail!("Couldn't find a configuration file. Did you start the daemon yet?");
    }

    // If no subcommand is given, we default to the `status` subcommand.
    let subcommand = opt.cmd.unwrap_or(SubCommand::Status { json: false });

    let mut client = Client::new(settings)
        .await
        .context("Failed to initialize client.")?;

    handle_command(&mut client, subcommand).await
}
