#[tokio::main]
async fn main() -> anyhow::Result<()> {
    ledger_cli::run().await
}
