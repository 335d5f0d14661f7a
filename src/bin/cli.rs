//! stashkv - command-line cache consumer
//!
//! Runs the daemon bootstrap, then performs a single cache call.

use anyhow::{bail, Context};
use stashkv::bootstrap::Bootstrap;
use stashkv::client::Lookup;
use stashkv::config::Config;
use std::io::Write;
use std::time::Duration;

/// One parsed invocation
enum Command {
    Get { key: String },
    Put { key: String, value: String, ttl: Duration },
    Delete { key: String },
}

fn parse_args(args: &[String]) -> anyhow::Result<Command> {
    let (name, rest) = match args.split_first() {
        Some((name, rest)) => (name.as_str(), rest),
        None => bail!("missing command"),
    };

    match (name, rest) {
        ("get", [key]) => Ok(Command::Get { key: key.clone() }),
        ("del" | "delete", [key]) => Ok(Command::Delete { key: key.clone() }),
        ("put", [key, value, options @ ..]) => {
            let ttl = match options {
                [] => Duration::ZERO,
                [flag, secs] if flag == "--ttl" => {
                    let secs: u64 = secs
                        .parse()
                        .with_context(|| format!("invalid --ttl value '{}'", secs))?;
                    Duration::from_secs(secs)
                }
                _ => bail!("usage: stashkv put <key> <value> [--ttl <secs>]"),
            };
            Ok(Command::Put {
                key: key.clone(),
                value: value.clone(),
                ttl,
            })
        }
        _ => bail!("unrecognized arguments: {}", args.join(" ")),
    }
}

fn print_help() {
    println!(
        r#"
stashkv - talk to the stashkv cache daemon

USAGE:
    stashkv get <key>
    stashkv put <key> <value> [--ttl <secs>]
    stashkv del <key>

The daemon is started automatically if it is not already running.
Without --ttl, puts use the daemon's default TTL.
"#
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();

    match args.first().map(String::as_str) {
        Some("--help" | "-h") | None => {
            print_help();
            return Ok(());
        }
        Some("--version" | "-v") => {
            println!("stashkv version {}", stashkv::VERSION);
            return Ok(());
        }
        _ => {}
    }

    let command = parse_args(&args)?;

    let config = Config::from_env().context("invalid configuration")?;
    stashkv::logging::init(None).context("failed to set up logging")?;

    let client = Bootstrap::new(&config.socket_path)
        .connect()
        .await
        .context("cache daemon unavailable")?;

    match command {
        Command::Get { key } => match client.get(&key).await? {
            Lookup::Found(value) => {
                let mut stdout = std::io::stdout().lock();
                stdout.write_all(&value)?;
                stdout.write_all(b"\n")?;
            }
            Lookup::NotFound => println!("(not found)"),
            Lookup::Expired => println!("(expired)"),
        },
        Command::Put { key, value, ttl } => {
            client.put(&key, value, ttl).await?;
            println!("OK");
        }
        Command::Delete { key } => {
            client.delete(&key).await?;
            println!("OK");
        }
    }

    Ok(())
}
