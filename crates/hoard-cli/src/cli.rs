use clap::{Parser, Subcommand};

/// CLI surface definition.
#[derive(Parser, Debug)]
#[command(
    name = "hoard",
    about = "Device-local encrypted key-value storage",
    version,
    propagate_version = true
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Print the value stored under a key as JSON.
    Get { key: String },
    /// Store a value. Valid JSON is stored as-is, anything else as a string.
    Set { key: String, value: String },
    /// Remove a key.
    Remove { key: String },
    /// Encrypt plain entries written before encryption was enabled.
    Migrate,
    /// Report whether values are currently being encrypted.
    Status,
    /// Run a round-trip check against the configured store.
    Health,
    /// Print version and exit.
    Version,
    /// Manage CLI configuration.
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum ConfigCommand {
    /// Create a default config file if one does not exist.
    Init,
}
