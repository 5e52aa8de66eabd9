#![warn(clippy::uninlined_format_args)]

mod bootstrap;

use std::process;

#[tokio::main]
async fn main() {
    if let Err(err) = bootstrap::run().await {
        tracing::error!(error = %err, "splitsmart failed");
        eprintln!("Error: {err}");
        process::exit(1);
    }
}
