use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    botdash_cli::run_app().await
}
