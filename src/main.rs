use clap::Parser;

use fastsetops::{Db, Server};

#[derive(Parser)]
#[command(name = "fastsetops")]
#[command(about = "SQLite-backed Redis-compatible server with filtered sorted set range queries")]
struct Args {
    /// Database file path
    #[arg(short, long, default_value = "fastsetops.db")]
    db: String,

    /// Listen address
    #[arg(short, long, default_value = "127.0.0.1:6767")]
    addr: String,

    /// Rows fetched per round trip when walking a score range
    #[arg(long, default_value_t = 128, value_parser = clap::value_parser!(u16).range(1..))]
    scan_batch: u16,

    /// Log at debug level (connections, per-scan summaries)
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = if args.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    let db = Db::open(&args.db)?;
    db.set_scan_batch(args.scan_batch as usize);
    tracing::info!("Opened database: {} (scan batch {})", args.db, args.scan_batch);

    let server = Server::new(db);
    server.run(&args.addr).await?;

    Ok(())
}
