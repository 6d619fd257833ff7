// src/main.rs

use runguard::{cli, logging, run};

#[tokio::main]
async fn main() {
    match run_main().await {
        Ok(exit) => std::process::exit(exit.code()),
        Err(err) => {
            eprintln!("runguard error: {err:?}");
            std::process::exit(2);
        }
    }
}

async fn run_main() -> anyhow::Result<runguard::RunExit> {
    let args = cli::parse();
    logging::init_logging(args.log_level)?;
    run(args).await
}
