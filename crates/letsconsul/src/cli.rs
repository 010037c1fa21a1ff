use std::path::PathBuf;

use clap::{ArgAction, Parser};

/// Let's Encrypt production directory.
pub const DEFAULT_ACME_DIRECTORY: &str = "https://acme-v02.api.letsencrypt.org/directory";

#[derive(Parser, Debug)]
#[command(
    name = "letsconsul",
    version,
    about = "Certificate renewal daemon coordinated through Consul"
)]
pub struct Cli {
    /// host:port the HTTP-01 challenge responder binds to
    #[arg(
        short = 'b',
        long = "bind",
        env = "LETSCONSUL_BIND",
        default_value = "0.0.0.0:8080"
    )]
    pub bind: String,

    /// Consul agent address
    #[arg(
        short = 'c',
        long = "consul",
        env = "CONSUL_HTTP_ADDR",
        default_value = "127.0.0.1:8500"
    )]
    pub consul: String,

    /// Consul ACL token
    #[arg(long, env = "CONSUL_TOKEN", hide_env_values = true)]
    pub consul_token: Option<String>,

    /// KV namespace prefix for all daemon state
    #[arg(long, env = "LETSCONSUL_PREFIX", default_value = "letsconsul")]
    pub prefix: String,

    /// ACME directory URL
    #[arg(
        long,
        env = "LETSCONSUL_ACME_DIRECTORY",
        default_value = DEFAULT_ACME_DIRECTORY
    )]
    pub acme_directory: String,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, env = "LETSCONSUL_LOG", default_value = "info")]
    pub log_level: String,

    /// Increase verbosity (-v = debug, -vv = trace)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    /// Write logs to file (in addition to stderr)
    #[arg(long, env = "LETSCONSUL_LOG_FILE", value_name = "PATH")]
    pub log_file: Option<PathBuf>,
}
