use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;

/// Two-player Shogi server: rooms over WebSocket, static client files over HTTP.
#[derive(Debug, Clone, Parser)]
#[command(name = "shogi-server", version, about)]
pub struct Config {
    /// Interface to bind.
    #[arg(long, env = "SHOGI_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// TCP port to listen on.
    #[arg(short, long, env = "PORT", default_value_t = 3000)]
    pub port: u16,

    /// Directory served for every path other than `/ws` and `/health`.
    #[arg(long, env = "SHOGI_STATIC_DIR", default_value = "public")]
    pub static_dir: PathBuf,

    /// Default log filter, overridden by `RUST_LOG` when set.
    #[arg(long, env = "SHOGI_LOG", value_name = "FILTER", default_value = "info")]
    pub log_level: String,
}

impl Config {
    /// Get the address to bind, e.g. `0.0.0.0:3000`.
    pub fn bind_addr(&self) -> anyhow::Result<SocketAddr> {
        let addr = format!("{}:{}", self.host, self.port);
        addr.parse()
            .map_err(|err| anyhow::anyhow!("invalid bind address {addr}: {err}"))
    }
}
