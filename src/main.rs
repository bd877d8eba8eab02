use anyhow::Context;
use clap::Parser;
use rfcomm_probe::{cli::Cli, logging, BluezDiscovery, DiagnosticClient};
use std::process::ExitCode;
use tracing::info;

fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init_logging(cli.verbose);

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {:#}", err);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> anyhow::Result<()> {
    let config = cli.resolve()?;
    info!(uuid = %config.service_uuid, name = %config.service_name, "probing service");

    let discovery = BluezDiscovery::new(config.inquiry()).with_hosts(config.addresses.clone());
    let mut client = DiagnosticClient::bluez(discovery);
    let target = client
        .run(&config.service_uuid, &config.service_name, &config.payloads)
        .with_context(|| {
            format!(
                "probe of {:?} ({}) failed",
                config.service_name, config.service_uuid
            )
        })?;

    info!(
        host = %target.host,
        channel = target.port,
        messages = config.payloads.len(),
        "done"
    );
    Ok(())
}
