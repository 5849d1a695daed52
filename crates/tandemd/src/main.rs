//! tandemd: link devices over a rendezvous path and inspect group calls.

use std::net::SocketAddr;

use anyhow::{Context, Result};

use tandem_core::TandemConfig;

mod link;
mod peek;

const DEFAULT_BIND: &str = "127.0.0.1:0";

fn print_usage() {
    println!("Usage: tandemd <command>");
    println!();
    println!("Commands:");
    println!("  offer [--bind <addr>]                  Print a join offer and wait for a device");
    println!("  link <offer>                           Link to the device that printed <offer>");
    println!("  peek <creator> <group-id> <gck> [--sfu <url>]");
    println!("                                         Ask the SFU whether a group call runs");
    println!();
    println!("Config: $TANDEM_CONFIG or ~/.config/tandem/config.toml, TANDEM_* overrides.");
    println!("Log level: RUST_LOG.");
}

/// Pull `--name value` out of `args`.
fn take_option<'a>(args: &mut Vec<&'a str>, name: &str) -> Result<Option<&'a str>> {
    let Some(i) = args.iter().position(|a| *a == name) else {
        return Ok(None);
    };
    let value = *args
        .get(i + 1)
        .with_context(|| format!("{name} requires a value"))?;
    args.drain(i..=i + 1);
    Ok(Some(value))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    if let Err(e) = TandemConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let config = TandemConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        TandemConfig::default()
    });

    let owned: Vec<String> = std::env::args().skip(1).collect();
    let mut args: Vec<&str> = owned.iter().map(String::as_str).collect();
    let bind = take_option(&mut args, "--bind")?;
    let sfu = take_option(&mut args, "--sfu")?;

    match args.as_slice() {
        ["offer"] => {
            let bind: SocketAddr = bind
                .unwrap_or(DEFAULT_BIND)
                .parse()
                .context("--bind must be <ip>:<port>")?;
            link::cmd_offer(&config, bind).await
        }
        ["link", offer] => link::cmd_link(&config, *offer).await,
        ["peek", creator, group_id, gck] => {
            let args = peek::PeekArgs {
                creator: *creator,
                group_id_hex: *group_id,
                gck_hex: *gck,
                sfu,
            };
            peek::cmd_peek(&config, args).await
        }
        ["help"] | ["--help"] | ["-h"] | [] => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {}", other.join(" "));
            eprintln!();
            print_usage();
            std::process::exit(1);
        }
    }
}
