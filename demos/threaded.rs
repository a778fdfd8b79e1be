//! Threaded example - answering from worker threads.
//!
//! `normalPing` sleeps on the loop, so simultaneous clients queue up
//! behind each other. `threadPing` defers and sleeps on a worker thread;
//! its latency stays flat however many clients call at once.
//!
//! # Running
//!
//! ```text
//! cargo run --example threaded
//! ```

use std::time::Duration;

use procwire_server::{Outcome, Response, ServerBuilder};
use serde_json::Value;
use tracing_subscriber::EnvFilter;

const PORT: u16 = 9998;
const WORK: Duration = Duration::from_millis(100);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut server = ServerBuilder::new()
        .port(PORT)
        .quit_on('q')
        .method("normalPing", |_ctx, params| {
            std::thread::sleep(WORK);
            Outcome::value(params)
        })
        .method("threadPing", |ctx, params| {
            let token = ctx.defer();
            let server = ctx.server().clone();
            std::thread::spawn(move || {
                std::thread::sleep(WORK);
                if let Err(e) = server.resolve(&token, Response::Success(Value::Array(params))) {
                    tracing::warn!("Could not answer request {}: {}", token.request_id(), e);
                }
            });
            Outcome::deferred()
        })
        .build();

    server.serve().await?;
    Ok(())
}
