use std::path::PathBuf;

use clap::{ArgGroup, Args, Parser, Subcommand};
use memoir_storage::Algorithm;

/// CLI surface definition: each subcommand maps onto one store session.
#[derive(Parser, Debug)]
#[command(
    name = "memoir",
    about = "Encrypted local store for website accounts",
    version,
    propagate_version = true
)]
pub struct Cli {
    #[command(flatten)]
    pub store: StoreArgs,

    #[command(subcommand)]
    pub command: Command,
}

/// Store location overrides; these win over `MEMOIR_*` variables and the config file.
#[derive(Args, Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreArgs {
    /// Encrypted store file.
    #[arg(long, global = true, value_name = "PATH")]
    pub store: Option<PathBuf>,
    /// Key file.
    #[arg(long, global = true, value_name = "PATH")]
    pub key: Option<PathBuf>,
    /// Key size in bits.
    #[arg(long, global = true, value_name = "BITS")]
    pub key_size: Option<usize>,
    /// Cipher: aes, blowfish or 3des.
    #[arg(long, global = true)]
    pub algorithm: Option<Algorithm>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Generate a new key file (never overwrites an existing one).
    Init {
        /// Key file size in bits; bytes past the key are random padding.
        #[arg(long, default_value_t = 1024, value_name = "BITS")]
        file_size: usize,
    },
    /// Add an account.
    #[command(group(ArgGroup::new("secret").required(true).args(["password", "generate"])))]
    Add {
        #[arg(long)]
        domain: String,
        #[arg(long)]
        username: String,
        /// Store this password.
        #[arg(long)]
        password: Option<String>,
        /// Generate a password of this length instead.
        #[arg(long, value_name = "LENGTH")]
        generate: Option<usize>,
        /// Include punctuation in the generated password.
        #[arg(long, requires = "generate")]
        secure: bool,
        #[arg(long)]
        comment: Option<String>,
    },
    /// List accounts, optionally filtered.
    List {
        #[arg(long)]
        domain: Option<String>,
        #[arg(long)]
        username: Option<String>,
        /// Print records as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Remove an account by id.
    Remove { id: i64 },
    /// Print a random password without touching the store.
    Password {
        length: usize,
        #[arg(long)]
        secure: bool,
    },
    /// Manage CLI configuration.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Print version and exit.
    Version,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum ConfigCommand {
    /// Create a default config file if one does not exist.
    Init,
}
