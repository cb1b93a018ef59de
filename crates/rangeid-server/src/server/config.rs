use std::{net::SocketAddr, time::Duration};

use anyhow::{Context, bail};
use clap::{Parser, ValueEnum};
use rangeid::UpdatePolicy;

/// Output format of the `fmt` log layer.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable lines.
    Text,
    /// One JSON object per event.
    Json,
}

/// Runtime configuration for the `rangeid-server` binary.
///
/// All values are parsed from CLI arguments or environment variables, with
/// defaults suitable for a single-node deployment.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "rangeid-server",
    version,
    about = "An HTTP service for range-scoped object ID allocation"
)]
pub struct CliArgs {
    /// Address to listen on.
    ///
    /// Environment variable: `SERVER_ADDR`
    #[arg(long, env = "SERVER_ADDR", default_value_t = String::from("0.0.0.0:8080"))]
    pub server_addr: String,

    /// Maximum read-mutate-write cycles per document update before the
    /// request fails with a retryable error.
    ///
    /// Environment variable: `MAX_UPDATE_ATTEMPTS`
    #[arg(long, env = "MAX_UPDATE_ATTEMPTS", default_value_t = 64)]
    pub max_update_attempts: u32,

    /// Wall-clock bound, in milliseconds, for one optimistic update loop.
    ///
    /// Environment variable: `UPDATE_TIMEOUT_MS`
    #[arg(long, env = "UPDATE_TIMEOUT_MS", default_value_t = 10_000)]
    pub update_timeout_ms: u64,

    /// Delay, in milliseconds, after the first version conflict. Doubles on
    /// every further conflict.
    ///
    /// Environment variable: `INITIAL_BACKOFF_MS`
    #[arg(long, env = "INITIAL_BACKOFF_MS", default_value_t = 5)]
    pub initial_backoff_ms: u64,

    /// Upper bound, in milliseconds, for a single backoff delay (before
    /// jitter).
    ///
    /// Environment variable: `MAX_BACKOFF_MS`
    #[arg(long, env = "MAX_BACKOFF_MS", default_value_t = 250)]
    pub max_backoff_ms: u64,

    /// Largest page returned by the admin listing.
    ///
    /// Environment variable: `MAX_PAGE_SIZE`
    #[arg(long, env = "MAX_PAGE_SIZE", default_value_t = 100)]
    pub max_page_size: usize,

    /// Largest `quantity` accepted by a single allocation request.
    ///
    /// Environment variable: `MAX_QUANTITY`
    #[arg(long, env = "MAX_QUANTITY", default_value_t = 1_000)]
    pub max_quantity: i64,

    /// Log output format.
    ///
    /// Environment variable: `LOG_FORMAT`
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub server_addr: SocketAddr,
    pub policy: UpdatePolicy,
    pub max_page_size: usize,
    pub max_quantity: i64,
    pub log_format: LogFormat,
}

impl TryFrom<CliArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        let server_addr = args
            .server_addr
            .parse()
            .with_context(|| format!("SERVER_ADDR ({}) is not a socket address", args.server_addr))?;

        if args.max_update_attempts == 0 {
            bail!("MAX_UPDATE_ATTEMPTS must be greater than 0");
        }
        if args.update_timeout_ms == 0 {
            bail!("UPDATE_TIMEOUT_MS must be greater than 0");
        }
        if args.initial_backoff_ms > args.max_backoff_ms {
            bail!(
                "INITIAL_BACKOFF_MS ({}) exceeds MAX_BACKOFF_MS ({})",
                args.initial_backoff_ms,
                args.max_backoff_ms
            );
        }
        if args.max_page_size == 0 {
            bail!("MAX_PAGE_SIZE must be greater than 0");
        }
        if args.max_quantity <= 0 {
            bail!("MAX_QUANTITY must be greater than 0");
        }

        Ok(Self {
            server_addr,
            policy: UpdatePolicy {
                max_attempts: args.max_update_attempts,
                timeout: Duration::from_millis(args.update_timeout_ms),
                initial_backoff: Duration::from_millis(args.initial_backoff_ms),
                max_backoff: Duration::from_millis(args.max_backoff_ms),
            },
            max_page_size: args.max_page_size,
            max_quantity: args.max_quantity,
            log_format: args.log_format,
        })
    }
}
