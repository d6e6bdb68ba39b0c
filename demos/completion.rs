//! Unary completion with model parameters and caller-maintained history
//!
//! ```bash
//! export ACCESS_KEY_ID=... ACCESS_KEY_SECRET=... AGENT_KEY=... APP_ID=...
//! cargo run --example completion
//! ```

use bailian::prelude::*;
use bailian::tracing_ext::{init_tracing, LogFormat};
use std::time::Duration;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing(LogFormat::Pretty)?;

    let app_id = std::env::var("APP_ID")?;

    // Create the token client once and reuse it across calls
    let tokens = AccessTokenClient::from_env()?;
    let config = CompletionConfig::from_env()?.with_timeout(Duration::from_secs(30));
    let client = CompletionClient::from_provider(config, &tokens).await?;

    let request = CompletionRequest::new(app_id, "What are the best-known sights in Beijing?")
        .with_top_p(0.2)
        .with_session_id(bailian::types::new_request_id())
        .with_history(vec![
            ChatQaMessage::new("I want to visit Beijing", "Beijing is lovely in autumn"),
        ])
        .with_parameters(ModelParameters {
            top_k: Some(50),
            seed: Some(2222),
            use_raw_prompt: Some(true),
            ..Default::default()
        })
        .with_doc_reference_type(DocReferenceType::Simple);

    let response = client.complete(request).await?;
    if !response.success {
        eprintln!(
            "completion failed, request_id: {}, code: {}, message: {}",
            response.request_id.unwrap_or_default(),
            response.code.unwrap_or_default(),
            response.message.unwrap_or_default()
        );
        return Ok(());
    }

    println!(
        "request_id: {}, text: {}",
        response.request_id.as_deref().unwrap_or_default(),
        response.text().unwrap_or_default()
    );
    Ok(())
}
