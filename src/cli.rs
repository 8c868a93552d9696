use std::net::SocketAddr;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show live per-bucket bandwidth of a server, refreshed in place
    Watch(Watch),
    /// Serve a synthetic bandwidth feed over TCP
    Mock(Mock),
}

#[derive(Parser, Clone, Debug)]
pub struct Watch {
    /// Telemetry feed to watch (host:port)
    #[arg(required_unless_present = "mock")]
    pub target: Option<String>,

    /// Bucket to watch; repeat for several (default: all buckets)
    #[arg(long = "bucket", value_name = "BUCKET")]
    pub buckets: Vec<String>,

    /// Emit one JSON record per refresh instead of tables
    #[arg(long)]
    pub json: bool,

    /// Disable colored output
    #[arg(long)]
    pub no_color: bool,

    /// How long a single read may block before checking for shutdown
    #[arg(long, default_value_t = 200)]
    pub poll_ms: u64,

    /// Watch an in-process synthetic feed instead of a server
    #[arg(long, conflicts_with = "target")]
    pub mock: bool,
}

#[derive(Parser, Clone, Debug)]
pub struct Mock {
    /// TCP listen address
    #[arg(long, default_value = "127.0.0.1:7878")]
    pub host: SocketAddr,

    /// Bucket to report when the client asks for all; repeat for several
    #[arg(long = "bucket", value_name = "BUCKET")]
    pub buckets: Vec<String>,

    /// Milliseconds between reports
    #[arg(long, default_value_t = 1000)]
    pub interval_ms: u64,

    /// Close each client after this many reports
    #[arg(long)]
    pub count: Option<u64>,
}
