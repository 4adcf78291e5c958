use std::sync::Arc;

use ai_harness::observability::init_observability;
use ai_harness::prelude::*;
use ai_harness::vendors::proxy::{ProxyProvider, ProxyRequestOptions, ProxyRunBuilderExt};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), HarnessError> {
    init_observability();

    let harness = Harness::builder()
        .register_provider(Arc::new(ProxyProvider::from_env()?))
        .build()?;
    let session = harness.session(SessionConfig::named("stream"));

    let mut run = session
        .run(ModelRef::new("proxy", "claude-sonnet-4"))
        .system_prompt("Reply to test AI harness streaming.")
        .user_text("Stream a greeting, then think about the weather.")
        .proxy_options(ProxyRequestOptions::default().max_tokens(512))
        .start_stream()
        .await?;

    while let Some(event) = run.next_event().await {
        match event {
            StreamEvent::TextDelta { delta, .. } => print!("{delta}"),
            StreamEvent::ThinkingDelta { delta, .. } => eprint!("{delta}"),
            StreamEvent::ToolCallEnd { tool_call, .. } => {
                println!("\n[tool call {} {}]", tool_call.name, serde_json::Value::Object(tool_call.arguments));
            }
            StreamEvent::Done { reason, .. } => println!("\n[done: {reason:?}]"),
            StreamEvent::Error { error, .. } => eprintln!(
                "\nrun error: {}",
                error.error_message.as_deref().unwrap_or("unknown error")
            ),
            _ => {}
        }
    }

    let message = run.finish().await?;
    let usage = session.usage();
    println!(
        "stop={:?} input={} output={} session_total={}",
        message.stop_reason, message.usage.input, message.usage.output, usage.total_tokens
    );
    Ok(())
}
