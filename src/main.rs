use anyhow::Result;
use kazador_sync::cli;

#[tokio::main]
async fn main() -> Result<()> {
    cli::run().await
}
