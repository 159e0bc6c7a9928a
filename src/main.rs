#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cass_doctor::run().await
}
