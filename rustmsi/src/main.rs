use clap::Parser;
use rustmsi::workflow::driver::{init_logging, run, Cli};

fn main() {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    if let Err(failure) = run(cli) {
        tracing::error!("{}", failure);
        std::process::exit(1);
    }
}
