#[tokio::main]
async fn main() -> anyhow::Result<()> {
    adwatch_lib::run().await
}
