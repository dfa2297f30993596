//! Streamtide CLI - Command-line interface
//!
//! Streams the largest file of a torrent over HTTP while it downloads and
//! shows download progress in the terminal.

mod commands;
mod dashboard;

use clap::Parser;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = commands::StreamArgs::parse();
    commands::run(args).await
}
