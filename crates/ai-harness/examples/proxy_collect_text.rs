use std::sync::Arc;
use std::time::Duration;

use ai_harness::prelude::*;
use ai_harness::vendors::proxy::ProxyProvider;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), HarnessError> {
    let harness = Harness::builder()
        .register_provider(Arc::new(ProxyProvider::from_env()?))
        .build()?;

    let text = harness
        .session(SessionConfig::named("collect"))
        .run(ModelRef::new("proxy", "claude-sonnet-4"))
        .system_prompt("Answer in one sentence.")
        .user_text("What does a streaming harness do?")
        .timeout(Duration::from_secs(60))
        .collect_text()
        .await?;

    println!("{text}");
    Ok(())
}
