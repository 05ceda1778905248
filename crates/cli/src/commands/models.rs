//! `ragstream models`: list the models the service exposes.

use ragstream_config::ClientConfig;
use ragstream_core::ChatTransport;
use ragstream_transport::HttpTransport;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = ClientConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let transport = HttpTransport::from_config(&config.transport)?;

    let models = transport.list_models().await?;
    if models.is_empty() {
        println!("  No models available at {}", config.transport.base_url);
        return Ok(());
    }

    for id in &models {
        let marker = if *id == config.chat.model { "*" } else { " " };
        println!("  {marker} {id}");
    }
    Ok(())
}
