use clap::Parser;
use pastelink::app;
use pastelink::cli::Cli;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(err) = app::run(cli).await {
        eprintln!("❌ {err}");
        std::process::exit(err.exit_code());
    }
}
