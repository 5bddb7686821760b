use clap::Parser;
use herder::cli::{output, Cli};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    cli.init_tracing();

    if let Err(e) = cli.execute().await {
        output::print_error(&e.to_string());
        std::process::exit(1);
    }
}
