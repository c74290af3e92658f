use anyhow::Result;
use clap::Parser;
use log::info;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::runtime::Builder;

use dvroute::daemon::Daemon;

#[derive(Parser)]
#[command(name = "dvroute", about = "Distance-vector routing daemon over UDP broadcast")]
struct Cli {
    /// Local IPv4 address announced in outgoing HELLO and DV messages
    #[arg(default_value = "192.168.1.100")]
    local_ip: String,
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    info!("Starting DV routing on IP={}", cli.local_ip);

    let rt = Builder::new_current_thread().enable_all().build()?;
    rt.block_on(async {
        let daemon = Arc::new(Daemon::bind(cli.local_ip)?);

        let runner = {
            let daemon = daemon.clone();
            tokio::spawn(async move { daemon.run().await })
        };

        println!("Press ENTER to stop...");
        let mut line = String::new();
        BufReader::new(tokio::io::stdin()).read_line(&mut line).await?;

        daemon.shutdown();
        runner.await?;

        info!("Exiting");
        Ok(())
    })
}
