//! keyhold snapshot tool
//!
//! Maintenance commands against a Redis-backed cache namespace:
//!
//! ```text
//! keyhold-snapshot dump <file>      write the namespace to <file>
//! keyhold-snapshot restore <file>   replace the namespace with <file>
//! keyhold-snapshot size             count entries
//! keyhold-snapshot clear            delete every entry
//! ```
//!
//! Connection and prefixes come from the `KEYHOLD_*` environment variables.

use std::process::ExitCode;
use std::sync::Arc;

use keyhold_core::{KeyholdConfig, KeyholdResult};
use keyhold_storage::{Cache, RedisKeyValueStore};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

enum Command {
    Dump(String),
    Restore(String),
    Size,
    Clear,
}

impl Command {
    fn parse(args: &[String]) -> Option<Self> {
        match args {
            [cmd, path] if cmd == "dump" => Some(Command::Dump(path.clone())),
            [cmd, path] if cmd == "restore" => Some(Command::Restore(path.clone())),
            [cmd] if cmd == "size" => Some(Command::Size),
            [cmd] if cmd == "clear" => Some(Command::Clear),
            _ => None,
        }
    }
}

const USAGE: &str = "usage: keyhold-snapshot <dump FILE | restore FILE | size | clear>";

#[tokio::main]
async fn main() -> ExitCode {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = Command::parse(&args) else {
        eprintln!("{}", USAGE);
        return ExitCode::from(2);
    };

    match run(command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Snapshot command failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Command) -> KeyholdResult<()> {
    let store = Arc::new(RedisKeyValueStore::from_env().await?);
    let cache = Cache::new(store, KeyholdConfig::from_env())?;
    cache.start().await;

    match command {
        Command::Dump(path) => {
            let count = cache.dump_write(&path).await?;
            println!("{}", count);
        }
        Command::Restore(path) => {
            let count = cache.dump_read(&path).await?;
            println!("{}", count);
        }
        Command::Size => println!("{}", cache.size().await?),
        Command::Clear => println!("{}", cache.clear().await?),
    }
    Ok(())
}
