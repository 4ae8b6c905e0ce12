use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("sqlview=info,rmcp=info")),
        )
        .init();

    tracing::info!("Starting sqlview MCP server");

    // Run the server
    sqlview::server::run().await
}
