//! Read-model projector - entry point

#[tokio::main]
async fn main() -> eyre::Result<()> {
    read_model_projector::run().await
}
