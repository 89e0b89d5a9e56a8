use anyhow::{Context, Result};

use toolrun_core::api::Client;

pub async fn tools(client: &Client) -> Result<()> {
    let text = client.list_tools().await?;
    println!("{}", text.trim_end());
    Ok(())
}

pub async fn models(client: &Client) -> Result<()> {
    for model in client.list_models().await? {
        println!("{model}");
    }
    Ok(())
}

pub async fn version(client: &Client) -> Result<()> {
    println!("toolrun {}", env!("CARGO_PKG_VERSION"));
    let engine = client.version().await.context("engine unavailable")?;
    println!("engine {engine}");
    Ok(())
}

pub async fn fmt(client: &Client, file: &str) -> Result<()> {
    let tools = client.parse(file).await?;
    let text = client.stringify(&tools).await?;
    print!("{text}");
    if !text.ends_with('\n') {
        println!();
    }
    Ok(())
}
