use corral::cli::Cli;
use tracing_subscriber::EnvFilter;

fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("corral=warn")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    // Errors are printed by the CLI itself
    if Cli::run().is_err() {
        std::process::exit(1);
    }
}
