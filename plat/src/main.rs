//! `plat` — BMC platform glue CLI.
//!
//! Prints the same JSON bodies the platform REST API serves: FRUID reads,
//! the board GPIO table, and the result of a password change.

use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use serde_json::Value;

use plat::core::gpio::{REVISIONS, board_gpio_table};
use plat::core::types::InventoryKind;
use plat::exit_codes;
use plat::fruid::fruid_action;
use plat::io::config::{DEFAULT_CONFIG_PATH, PlatConfig, load_config};
use plat::io::process::SystemRunner;
use plat::io::session::PtySpawner;
use plat::logging;
use plat::password::user_password_action;

#[derive(Parser)]
#[command(name = "plat", version, about = "BMC platform glue")]
struct Cli {
    /// Platform config file (defaults apply when it does not exist).
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the GPIO pin-name table for a board revision.
    Gpio {
        #[arg(long, default_value = "v1")]
        revision: String,
    },
    /// Read FRUID inventory data through `fru-util`.
    Fruid {
        #[arg(value_enum)]
        kind: InventoryKind,
        /// Single PSU or fan slot (1-based). Fans default to every slot.
        #[arg(long)]
        index: Option<u32>,
    },
    /// Change a local account password. Reads `{"user", "newpassword"}` JSON on stdin.
    UserPassword,
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Gpio { revision } => cmd_gpio(&revision),
        Command::Fruid { kind, index } => {
            let cfg = load(&cli.config)?;
            let runner = SystemRunner {
                output_limit_bytes: cfg.output_limit_bytes,
            };
            print_result(&fruid_action(&runner, &cfg.fruid, kind, index))
        }
        Command::UserPassword => {
            let cfg = load(&cli.config)?;
            let mut raw = String::new();
            std::io::stdin()
                .read_to_string(&mut raw)
                .context("read request body from stdin")?;
            let body: Value = serde_json::from_str(&raw).context("parse request body")?;
            let runner = SystemRunner {
                output_limit_bytes: cfg.output_limit_bytes,
            };
            print_result(&user_password_action(
                &runner,
                &PtySpawner::default(),
                &cfg.password,
                &body,
            ))
        }
    }
}

fn load(path: &Path) -> Result<PlatConfig> {
    load_config(path).with_context(|| format!("load config {}", path.display()))
}

fn cmd_gpio(revision: &str) -> Result<i32> {
    let table = board_gpio_table(revision).ok_or_else(|| {
        anyhow!(
            "unknown board revision {revision:?} (known: {})",
            REVISIONS.join(", ")
        )
    })?;
    let value = serde_json::to_value(table).context("serialize gpio table")?;
    print_json(&value)?;
    Ok(exit_codes::OK)
}

/// Print a handler response; `{"result": "fail"}` maps to a failing exit code.
fn print_result(value: &Value) -> Result<i32> {
    print_json(value)?;
    if value.get("result").and_then(Value::as_str) == Some("fail") {
        Ok(exit_codes::FAILED)
    } else {
        Ok(exit_codes::OK)
    }
}

fn print_json(value: &Value) -> Result<()> {
    let payload = serde_json::to_string_pretty(value).context("serialize json")?;
    println!("{payload}");
    Ok(())
}
