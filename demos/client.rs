//! Example client - calls a few methods on a running server.
//!
//! # Running
//!
//! ```text
//! cargo run --example exserver
//! cargo run --example client -- 43434
//! ```

use procwire_server::{Client, ProcwireError};
use serde_json::json;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let port: u16 = match std::env::args().nth(1) {
        Some(arg) => arg.parse()?,
        None => procwire_server::config::DEFAULT_PORT,
    };

    let mut client = Client::connect(("127.0.0.1", port)).await?;

    println!("ping -> {}", client.call_value("ping", vec![]).await?);
    println!(
        "echo -> {}",
        client.call_value("echo", vec![json!("hello"), json!(42)]).await?
    );
    println!("commands -> {}", client.call_value("getCommands", vec![]).await?);

    match client.call_value("faulty", vec![]).await {
        Err(ProcwireError::Fault(fault)) => println!("faulty -> {}", fault),
        other => println!("faulty -> unexpected {:?}", other),
    }

    println!("leave -> {}", client.call_value("leave", vec![]).await?);
    Ok(())
}
