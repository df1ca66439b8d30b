//! `relay chat`: stream a chat completion and print deltas as they arrive.

use crate::error::CliResult;
use relay_gateway::stream::{StreamEvent, stream_chat};
use std::io::Write;
use std::time::Duration;

pub async fn run(base_url: &str, prompt: &str, request_id: Option<&str>, timeout_secs: u64) -> CliResult<()> {
    let client = reqwest::Client::new();

    stream_chat(
        &client,
        base_url,
        prompt,
        request_id,
        Duration::from_secs(timeout_secs),
        |info| {
            println!("Status: {}", info.status);
            println!("X-Request-ID: {}", info.request_id.as_deref().unwrap_or("(none)"));
            println!("Content-Type: {}", info.content_type.as_deref().unwrap_or("(none)"));
            println!("--- stream ---");
        },
        |event| match event {
            StreamEvent::Delta(text) => {
                print!("{text}");
                let _ = std::io::stdout().flush();
            }
            StreamEvent::Done => println!("[DONE]"),
        },
    )
    .await?;

    println!("\n--- end ---");
    Ok(())
}
