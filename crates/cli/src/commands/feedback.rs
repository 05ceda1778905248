//! `ragstream feedback`: rate an answer by its completion id.

use ragstream_config::ClientConfig;
use ragstream_core::store::{self, JsonFileStore};
use ragstream_core::{ChatTransport, FeedbackRequest, Rating};
use ragstream_transport::HttpTransport;

pub async fn run(
    message_id: String,
    rating: Rating,
    reason: Option<String>,
    comment: Option<String>,
    sources: Vec<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = ClientConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let transport = HttpTransport::from_config(&config.transport)?;
    let store = JsonFileStore::open(config.store_path());
    let conversation_id = store::load_or_create_conversation_id(&store)?;

    transport
        .send_feedback(FeedbackRequest {
            conversation_id: conversation_id.to_string(),
            message_id: message_id.clone(),
            rating,
            reason,
            comment,
            sources,
        })
        .await?;

    println!("  Feedback recorded for {message_id}");
    Ok(())
}
