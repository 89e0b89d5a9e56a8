use anyhow::Result;
use clap::Parser;

mod commands;
mod logging;
mod stdio;

use commands::{catalog, cli, exec};
use toolrun_core::api::{load_default, load_from, Client};

#[tokio::main]
async fn main() {
    let code = match real_main().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            exec::EXIT_ERROR
        }
    };
    std::process::exit(code);
}

async fn real_main() -> Result<i32> {
    let args = cli::Args::parse();

    let mut cfg = match &args.config {
        Some(path) => load_from(path)?,
        None => load_default()?,
    };
    if let Some(url) = &args.engine_url {
        cfg.engine.base_url = url.clone();
    }
    let _log_guard = logging::init_logging(&cfg.logging)?;

    let engine = toolrun_plugins::factory::build_engine(&cfg)?;
    let client = Client::new(engine, cfg).await?;

    let result = dispatch(&client, &args.command).await;
    client.close().await;
    result
}

async fn dispatch(client: &Client, cmd: &cli::Commands) -> Result<i32> {
    match cmd {
        cli::Commands::Run(run_args) => exec::run_file(client, run_args).await,
        cli::Commands::Eval(eval_args) => exec::eval(client, eval_args).await,
        cli::Commands::Tools => catalog::tools(client).await.map(|_| exec::EXIT_OK),
        cli::Commands::Models => catalog::models(client).await.map(|_| exec::EXIT_OK),
        cli::Commands::Version => catalog::version(client).await.map(|_| exec::EXIT_OK),
        cli::Commands::Fmt(fmt_args) => catalog::fmt(client, &fmt_args.file)
            .await
            .map(|_| exec::EXIT_OK),
    }
}
