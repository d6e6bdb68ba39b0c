//! Text embeddings through the identity service API
//!
//! ```bash
//! export ACCESS_KEY_ID=... ACCESS_KEY_SECRET=... AGENT_KEY=...
//! cargo run --example embeddings
//! ```

use bailian::tracing_ext::{init_tracing, LogFormat};
use bailian::{PopClient, TextType};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing(LogFormat::Pretty)?;

    let client = PopClient::from_env()?;
    let inputs = vec!["What is the weather like today?".to_string()];

    for embedding in client
        .create_text_embeddings(&inputs, Some(TextType::Query))
        .await?
    {
        println!(
            "index: {}, dimensions: {}, head: {:?}",
            embedding.text_index,
            embedding.embedding.len(),
            &embedding.embedding[..embedding.embedding.len().min(4)]
        );
    }

    Ok(())
}
