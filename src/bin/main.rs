use watchman::{cli, config, telemetry};

fn main() {
    let cli = cli::parse_from(std::env::args_os());

    let _telemetry_guard = init_tracing(cli.verbose);

    if let Err(err) = cli::run(cli) {
        tracing::error!("error: {err}");
        std::process::exit(1);
    }
}

fn init_tracing(verbose: u8) -> telemetry::TelemetryGuard {
    let config = config::load_or_default();
    telemetry::init(verbose, &config.logging)
}
