//! Streaming completion printed as it arrives
//!
//! ```bash
//! export ACCESS_KEY_ID=... ACCESS_KEY_SECRET=... AGENT_KEY=... APP_ID=...
//! cargo run --example stream_completion
//! ```

use bailian::prelude::*;
use bailian::tracing_ext::{init_tracing, LogFormat};
use futures::StreamExt;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing(LogFormat::Pretty)?;

    let app_id = std::env::var("APP_ID")?;
    let tokens = AccessTokenClient::from_env()?;
    let client = CompletionClient::from_provider(CompletionConfig::from_env()?, &tokens).await?;

    let request = CompletionRequest::new(
        app_id,
        "Write a 500 word essay on the politics of the Warring States period",
    )
    .with_parameters(ModelParameters {
        incremental_output: Some(true),
        ..Default::default()
    });

    let mut stream = client.stream(request).await?;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if !chunk.success {
            eprintln!(
                "got failed chunk, request_id: {}, code: {}, message: {}",
                chunk.request_id.unwrap_or_default(),
                chunk.code.unwrap_or_default(),
                chunk.message.unwrap_or_default()
            );
            continue;
        }
        print!("{}", chunk.text().unwrap_or_default());
    }
    println!();

    Ok(())
}
