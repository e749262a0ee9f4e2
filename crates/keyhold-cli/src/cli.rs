use clap::{Parser, Subcommand};

/// CLI surface definition.
#[derive(Parser, Debug)]
#[command(
    name = "keyhold",
    about = "Device-bound envelope keys: a KEK in the OS key store wrapping a file-backed DEK",
    version,
    propagate_version = true
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    #[command(flatten)]
    Key(KeyCommand),
    /// Create, use, and delete a throwaway key pair to verify both stores.
    Health,
    /// Print version and exit.
    Version,
    /// Manage CLI configuration.
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum KeyCommand {
    /// Create a KEK and a wrapped DEK for NAME.
    Create {
        name: String,
        /// Replace an existing pair.
        #[arg(long)]
        force: bool,
        /// Allow the wrapped DEK to be picked up by backups.
        #[arg(long)]
        include_in_backup: bool,
    },
    /// Report whether the pair for NAME exists; fails if only one half does.
    Exists { name: String },
    /// Show which halves of the pair for NAME are present.
    Status { name: String },
    /// Delete the pair for NAME.
    Delete {
        name: String,
        /// Delete whatever halves exist, ignoring missing ones.
        #[arg(long)]
        force: bool,
    },
    /// Seal stdin under NAME's DEK; prints a base64 envelope.
    Encrypt {
        name: String,
        /// Associated data authenticated with the payload.
        #[arg(long, default_value = "")]
        aad: String,
    },
    /// Open a base64 envelope from stdin; prints the plaintext.
    Decrypt { name: String },
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum ConfigCommand {
    /// Create a default config file if one does not exist.
    Init,
}
