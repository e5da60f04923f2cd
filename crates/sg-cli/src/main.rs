use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use sg_config::{DaemonConfig, default_docs};
use sg_runtime::lifecycle::{Daemon, wait_for_signal};

#[derive(Parser)]
#[command(name = "spamgate", about = "Email classification and anti-spam daemon")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the daemon
    Run {
        /// Path to spamgate.toml; relative paths resolve against
        /// SPAMGATE_CONFDIR
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Show configuration documentation
    Confighelp {
        /// Restrict output to these section keys
        keys: Vec<String>,
        /// Compact JSON instead of pretty-printed
        #[arg(long)]
        compact: bool,
        /// Keyword search over option names and doc strings
        #[arg(short = 'k', long)]
        keyword: Option<String>,
    },
}

/// Exit codes: 0 success, 1 configuration or usage error, 2 runtime error
/// after startup.
fn main() -> ExitCode {
    let cli = Cli::parse();
    match cli.command {
        Commands::Run { config } => run(config),
        Commands::Confighelp {
            keys,
            compact,
            keyword,
        } => confighelp(keys, compact, keyword),
    }
}

fn run(config_path: PathBuf) -> ExitCode {
    let config = match DaemonConfig::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("spamgate: configuration error: {e:#}");
            return ExitCode::from(1);
        }
    };

    let base_dir = config_path
        .parent()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));
    let _guard = match sg_runtime::tracing_init::init_tracing(&config.logging, &base_dir) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("spamgate: logging setup failed: {e:#}");
            return ExitCode::from(1);
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("spamgate: runtime setup failed: {e}");
            return ExitCode::from(2);
        }
    };

    let result = runtime.block_on(async {
        let daemon = Daemon::start(config).await?;
        tracing::info!(
            scan = %daemon.scan_addr(),
            fuzzy = %daemon.fuzzy_addr(),
            "spamgate listening"
        );
        wait_for_signal(daemon.cancel_token(), || {
            // The non-blocking appender reopens on rotation; nothing to do
            // here beyond acknowledging the signal.
        })
        .await;
        daemon.shutdown();
        daemon.wait().await
    });

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "daemon failed");
            ExitCode::from(2)
        }
    }
}

fn confighelp(keys: Vec<String>, compact: bool, keyword: Option<String>) -> ExitCode {
    let docs = default_docs();
    match keyword {
        Some(keyword) => {
            let hits = docs.search(&keyword);
            if hits.is_empty() {
                eprintln!("no options matching {keyword:?}");
                return ExitCode::from(1);
            }
            for (section, opt) in hits {
                println!(
                    "{section}.{}  ({}, default {})\n    {}",
                    opt.key, opt.kind, opt.default, opt.doc
                );
            }
        }
        None => println!("{}", docs.render(&keys, compact)),
    }
    ExitCode::SUCCESS
}
