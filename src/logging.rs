use tracing_subscriber::EnvFilter;

pub fn init_logging(verbosity: u8) {
    // 0 = run milestones only, 1 (-v) = protocol steps, 2+ (-vv) = everything
    let filter = match verbosity {
        0 => "warn,rfcomm_probe=info",
        1 => "info,rfcomm_probe=debug",
        _ => "trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(verbosity > 0)
        .compact()
        .init();
}
