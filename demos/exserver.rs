//! Example server - immediate answers, faults and typed arguments.
//!
//! This example demonstrates:
//! - Building a server with the fluent builder
//! - Raw and typed method handlers
//! - Returning a structured fault
//! - Stopping from the console with `q`
//!
//! # Running
//!
//! ```text
//! cargo run --example exserver -- 43434
//! cargo run --example client -- 43434
//! ```

use procwire_server::{Outcome, ServerBuilder};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

/// Result of the `stats` method.
#[derive(Serialize, Debug)]
struct Stats {
    count: usize,
    sum: f64,
    mean: f64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let port = match std::env::args().nth(1) {
        Some(arg) => arg.parse()?,
        None => procwire_server::config::DEFAULT_PORT,
    };

    let mut server = ServerBuilder::new()
        .port(port)
        .log_level(3)
        .quit_on('q')
        .usage("echo(args...)     returns its arguments")
        .usage("faulty()          always fails with fault 23")
        .usage("add(a, b)         integer sum")
        .usage("stats([x, ...])   count, sum and mean")
        .method("echo", |_ctx, params| Outcome::value(params))
        .method("faulty", |_ctx, _params| Outcome::fault(23, "blah"))
        .typed("add", |(a, b): (i64, i64), _ctx| Outcome::value(a + b))
        .typed("stats", |(values,): (Vec<f64>,), _ctx| {
            let sum: f64 = values.iter().sum();
            let count = values.len();
            let mean = if count == 0 { 0.0 } else { sum / count as f64 };
            Outcome::serialize(&Stats { count, sum, mean })
        })
        .on_cleanup(|| tracing::info!("Goodbye"))
        .build();

    server.serve().await?;
    Ok(())
}
