//! 🚀 stash-cli — the front door, the bouncer, the maitre d' of stash.
//!
//! 📦 This binary crate is the thin CLI wrapper that sets up logging, loads config,
//! and then lets the library do the heavy lifting. Like a manager. 🦆
//!
//! It is also the only place allowed to decide that the process should die.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use stash::errors::UnsupportedVersionError;
use tracing::error;
use tracing_subscriber::EnvFilter;

/// 📮 Bulk-index an NDJSON file into Elasticsearch, in size-bounded chunks.
#[derive(Debug, Parser)]
#[command(name = "stash", version, about)]
struct Args {
    /// 🔧 Path to the TOML config. Missing file means env vars (STASH_*) only.
    #[arg(default_value = "stash.toml")]
    config: PathBuf,
}

/// 🚀 main() — where it all begins.
///
/// 🔧 Steps:
/// 1. Init tracing (so we can see what goes wrong, and when)
/// 2. Parse args
/// 3. Load config (the moment of truth)
/// 4. Run the thing (send it and pray 🙏)
/// 5. Handle errors (cry, then exit 1)
#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    // 🔒 Validate the config file exists before we get too emotionally attached
    let config_file = args.config.as_path();
    let config_file_if_it_exists = match config_file.try_exists().with_context(|| {
        format!(
            "💀 Couldn't check whether the configuration file exists. Was checking here: '{}'",
            config_file.display()
        )
    })? {
        true => Some(config_file),
        false => None,
    };

    let app_config = stash::app_config::load_config(config_file_if_it_exists)
        .context("💀 In stash-cli, main, we couldn't load the config. Take a look at the file and the STASH_* env vars.")?;

    let result = stash::run(app_config).await;

    if let Err(err) = result {
        // 🚧 the version gate said no. the library reported it; here is where we decide to leave.
        if let Some(unsupported) = err.downcast_ref::<UnsupportedVersionError>() {
            error!("💀 {unsupported}");
            std::process::exit(1);
        }

        error!("💀 error: {}", err);
        // -- 🧅 peel the onion of sadness, one layer at a time
        let mut the_vibes_are_giving_connection_issues = false;
        for cause in err.chain().skip(1) {
            error!("⚠️  cause: {}", cause);
            let cause_str = cause.to_string();
            if cause_str.contains("error sending request")
                || cause_str.contains("onnection refused")
                || cause_str.contains("tcp connect error")
                || cause_str.contains("dns error")
            {
                the_vibes_are_giving_connection_issues = true;
            }
        }

        if the_vibes_are_giving_connection_issues {
            error!(
                "🔧 hint: looks like Elasticsearch isn't reachable. Double-check the hosts in your config \
                and that the cluster is actually running. If you're using Docker, try `docker ps`. \
                Even servers need a nudge sometimes. ☕"
            );
        }

        std::process::exit(1);
    }

    Ok(())
}
