//! CLI tests for `plat fruid` and `plat gpio`.
//!
//! Spawns the plat binary against a shell script standing in for `fru-util`
//! and verifies the printed JSON and exit codes.

use std::fs;
use std::path::Path;
use std::process::{Command, Output};
use std::time::{Duration, Instant};

use plat::exit_codes;
use plat::io::config::{PlatConfig, write_config};
use plat::test_support::{ScriptDir, process_exits_within};
use serde_json::{Value, json};

/// `fru-util` stand-in: fan 3 prints a header and then hangs in a forked
/// `sleep` whose pid lands next to the script.
const FAKE_FRU_UTIL: &str = r#"case "$1" in
  psu)
    if [ "$2" = "-a" ]; then
      printf 'PSU1 Serial: PS-0001\nPSU2 Serial: PS-0002\n'
    else
      printf 'PSU%s Serial: PS-000%s\n' "$2" "$2"
    fi ;;
  fan)
    if [ "$2" = "3" ]; then
      printf 'Fan 3 Board Mfg: part'
      sleep 30 &
      echo $! > "$(dirname "$0")/fan3.pid"
      wait
    fi
    printf 'Fan %s Serial: FN-000%s\n' "$2" "$2" ;;
  sys) printf 'System Product Name: questone2\n' ;;
esac"#;

fn write_test_config(dir: &Path, fru_util: &Path) -> std::path::PathBuf {
    let mut cfg = PlatConfig::default();
    cfg.fruid.fru_util = fru_util.to_path_buf();
    cfg.fruid.timeout_secs = 1;
    let path = dir.join("config.toml");
    write_config(&path, &cfg).expect("write config");
    path
}

fn plat(config: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_plat"))
        .arg("--config")
        .arg(config)
        .args(args)
        .output()
        .expect("run plat")
}

fn stdout_json(output: &Output) -> Value {
    serde_json::from_slice(&output.stdout).expect("stdout is json")
}

#[test]
fn fan_read_substitutes_partial_output_for_hung_slot() {
    let scripts = ScriptDir::new().expect("script dir");
    let fru_util = scripts.script("fru-util", FAKE_FRU_UTIL).expect("script");
    let config = write_test_config(scripts.path(), &fru_util);

    let started = Instant::now();
    let output = plat(&config, &["fruid", "fan"]);

    assert_eq!(output.status.code(), Some(exit_codes::OK));
    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(
        stdout_json(&output),
        json!({
            "Information": [
                "Fan 1 Serial: FN-0001\n",
                "Fan 2 Serial: FN-0002\n",
                "Fan 3 Board Mfg: part",
                "Fan 4 Serial: FN-0004\n",
            ],
            "Actions": [],
            "Resources": [],
        })
    );
    let sleeper: u32 = fs::read_to_string(scripts.path().join("fan3.pid"))
        .expect("pid file")
        .trim()
        .parse()
        .expect("pid");
    assert!(process_exits_within(sleeper, Duration::from_secs(2)));
}

#[test]
fn psu_read_wraps_output() {
    let scripts = ScriptDir::new().expect("script dir");
    let fru_util = scripts.script("fru-util", FAKE_FRU_UTIL).expect("script");
    let config = write_test_config(scripts.path(), &fru_util);

    let output = plat(&config, &["fruid", "psu"]);

    assert_eq!(output.status.code(), Some(exit_codes::OK));
    let value = stdout_json(&output);
    assert_eq!(value["Information"], json!("PSU1 Serial: PS-0001\nPSU2 Serial: PS-0002\n"));
    assert_eq!(value["Actions"], json!([]));
    assert_eq!(value["Resources"], json!([]));
}

#[test]
fn single_psu_index_is_passed_through() {
    let scripts = ScriptDir::new().expect("script dir");
    let fru_util = scripts.script("fru-util", FAKE_FRU_UTIL).expect("script");
    let config = write_test_config(scripts.path(), &fru_util);

    let output = plat(&config, &["fruid", "psu", "--index", "2"]);

    assert_eq!(output.status.code(), Some(exit_codes::OK));
    assert_eq!(
        stdout_json(&output)["Information"],
        json!("PSU2 Serial: PS-0002\n")
    );
}

#[test]
fn missing_utility_prints_fail_result() {
    let scripts = ScriptDir::new().expect("script dir");
    let config = write_test_config(scripts.path(), &scripts.path().join("no-such-fru-util"));

    let output = plat(&config, &["fruid", "psu"]);

    assert_eq!(output.status.code(), Some(exit_codes::FAILED));
    assert_eq!(stdout_json(&output), json!({"result": "fail"}));
}

#[test]
fn gpio_prints_v1_table() {
    let scripts = ScriptDir::new().expect("script dir");
    let config = scripts.path().join("absent.toml");

    let output = plat(&config, &["gpio"]);

    assert_eq!(output.status.code(), Some(exit_codes::OK));
    let value = stdout_json(&output);
    let table = value.as_array().expect("array");
    assert_eq!(table.len(), 43);
    assert_eq!(table[0], json!({"pin": "GPIOA6", "signal": "BMC_MDC"}));
}

#[test]
fn invalid_config_exits_invalid() {
    let scripts = ScriptDir::new().expect("script dir");
    let config = scripts.path().join("config.toml");
    fs::write(&config, "[fruid]\ntimeout_secs = 0\n").expect("write");

    let output = plat(&config, &["fruid", "sys"]);

    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
    assert!(output.stdout.is_empty());
    assert!(String::from_utf8_lossy(&output.stderr).contains("timeout_secs"));
}
