mod cli;
mod config;
mod slots;
mod storage;

use clap::Parser;
use color_eyre::Result;
use memoir_core::password::Password;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::cli::{Command, ConfigCommand};

fn main() -> Result<()> {
    color_eyre::install()?;
    init_tracing();

    let cli = cli::Cli::parse();
    let config = config::load()?;
    match cli.command {
        Command::Version => print_version(),
        Command::Password { length, secure } => {
            println!("{}", Password::generate(length, slots::charset(secure))?)
        }
        Command::Config(ConfigCommand::Init) => {
            let settings = storage::resolve(&config, &cli.store)?;
            let path = config::write_default_if_missing(&settings.to_config())?;
            println!("Config initialized at {}", path.display());
        }
        Command::Init { file_size } => {
            let settings = storage::resolve(&config, &cli.store)?;
            storage::init_key(&settings, file_size)?;
            println!("Key file created at {}", settings.key_path.display());
        }
        cmd => {
            let settings = storage::resolve(&config, &cli.store)?;
            slots::handle(cmd, &settings)?
        }
    }

    Ok(())
}

fn init_tracing() {
    // Respect user-provided filters; stay quiet by default so stdout is just results.
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

fn print_version() {
    println!("memoir {}", env!("CARGO_PKG_VERSION"));
}
