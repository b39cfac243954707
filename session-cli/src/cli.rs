use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "sesh", version, about = "Issue authenticated API requests with automatic credential refresh")]
pub struct Args {
    /// Path to the configuration file
    #[arg(short, long, global = true, env = "SESH_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable verbose (debug) logging
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Only log errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Request timeout in seconds (overrides the config file)
    #[arg(long, global = true, env = "SESH_TIMEOUT")]
    pub timeout: Option<u64>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Store a signed-in session
    Login {
        /// Bearer token to attach to requests
        #[arg(long, env = "SESH_TOKEN")]
        token: String,

        /// Identifier sent to the token endpoint to obtain a new bearer
        #[arg(long, env = "SESH_REFRESH_ID")]
        refresh_id: String,
    },

    /// Forget the stored session
    Logout,

    /// Show whether a session is stored
    Status,

    /// Send an authenticated request and print the response
    Request {
        /// HTTP method (GET, POST, ...)
        method: String,

        /// Absolute URL or path relative to `base_url`
        url: String,

        /// Extra header, `Name: value` (repeatable)
        #[arg(short = 'H', long = "header")]
        headers: Vec<String>,

        /// JSON request body
        #[arg(short, long)]
        data: Option<String>,

        /// Print status and headers as well as the body
        #[arg(short, long)]
        include: bool,
    },

    /// Show or reset the configuration
    Config {
        #[arg(long)]
        show: bool,

        #[arg(long)]
        reset: bool,
    },
}
