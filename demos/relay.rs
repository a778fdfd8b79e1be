//! Relay example - one client's call answers another's.
//!
//! Every `relay` call answers the caller waiting before it with its own
//! arguments, then waits for the next caller. Two clients calling in turn
//! bounce messages back and forth.

use std::sync::Mutex;

use procwire_server::{Outcome, ServerBuilder, SourceId};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let waiting: Mutex<Option<SourceId>> = Mutex::new(None);

    let mut server = ServerBuilder::new()
        .log_level(5)
        .quit_on('q')
        .method("relay", move |ctx, params| {
            let mut waiting = waiting.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(previous) = waiting.take() {
                tracing::info!("{} answers {}", ctx.source(), previous);
                ctx.server().queue_response(previous, params)?;
            }
            *waiting = Some(ctx.source());
            Outcome::deferred()
        })
        .build();

    server.serve().await?;
    Ok(())
}
