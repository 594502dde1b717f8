extern crate simple_logger;
extern crate uplink_ack;

use simple_logger::SimpleLogger;
use uplink_ack::config;

fn run() -> Result<(), Box<dyn std::error::Error>> {
    // `RUST_LOG=debug` shows per-connection activity
    let level = config::log_level(std::env::var(config::LOG_VAR).ok());
    SimpleLogger::new().with_level(level).init()?;

    let config = uplink_ack::Config::from_env()?;
    uplink_ack::Server::bind(&config)?
        .tcp_nodelay(true)
        .start(uplink_ack::ack::handle)?;
    Ok(())
}

pub fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
