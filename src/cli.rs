use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "gatehouse")]
#[command(author, version, about = "Tiered access gating for documents and video")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP server and the video worker pool
    Start {
        /// Host to bind to (overrides config)
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Check that the external rasterizers and ffmpeg are available
    CheckTools,

    /// Validate configuration file
    Validate {
        /// Config file to validate (uses default if not specified)
        config: Option<PathBuf>,
    },

    /// Display version information
    Version,

    /// Generate a bcrypt password hash
    HashPassword {
        /// Password to hash
        password: String,
    },

    /// Generate a random secret for signing stream tokens
    GenerateSecret,

    /// Create a user account
    AddUser {
        username: String,

        password: String,

        /// Grant admin privileges
        #[arg(long)]
        admin: bool,
    },

    /// Set a user's subscription status
    SetSubscription {
        username: String,

        /// none, active or expired
        status: String,

        /// Expiry as RFC 3339 (e.g. 2027-01-01T00:00:00Z)
        #[arg(long)]
        expires: Option<String>,
    },
}
