use tracing_subscriber::EnvFilter;

/// Install a stderr subscriber that also collects `log` records from the
/// library crates. `RUST_LOG` wins over the `--verbose` default.
pub fn init(verbose: bool) {
    let fallback = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    let installed = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .with_target(verbose)
        .try_init();
    if let Err(err) = installed {
        eprintln!("Warning: logging disabled: {err}");
    }
}
