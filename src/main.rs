use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    order_desk::init_tracing();
    order_desk::cli::run().await
}
