mod relay;
mod server;
mod store;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    server::run().await
}
