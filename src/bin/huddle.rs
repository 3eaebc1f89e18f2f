//! huddle - line-mode client for the Huddle chat broker

use anyhow::{Context, Result};
use huddle::client;
use huddle::config::{ClientArgs, LogTarget};
use tokio::io::BufReader;

#[tokio::main]
async fn main() -> Result<()> {
    let args = ClientArgs::parse_args();
    huddle::init_logging(args.debug, &LogTarget::Stderr)?;

    let session = client::connect(&args.socket)
        .await
        .with_context(|| format!("Failed to connect to {}", args.socket.display()))?;

    let input = BufReader::new(tokio::io::stdin());
    let mut output = tokio::io::stdout();
    session
        .run(input, &mut output)
        .await
        .context("Connection to the server failed")?;

    Ok(())
}
