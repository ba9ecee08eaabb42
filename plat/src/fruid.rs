//! FRUID reads for `plat fruid` and the inventory REST handlers.
//!
//! Every read shells out to `fru-util` through a [`CommandRunner`] with a
//! short timeout. A slow or hung utility still yields an envelope: the output
//! captured before the deadline is reported in place of the full dump.

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

use crate::core::envelope::{Information, InventoryEnvelope, action_result};
use crate::core::types::InventoryKind;
use crate::io::config::FruidConfig;
use crate::io::process::{CommandRunner, CommandSpec, ProcessError};

#[derive(Debug, Error)]
pub enum InventoryError {
    #[error(transparent)]
    Process(#[from] ProcessError),
    #[error("{kind} index {index} out of range (1..={max})")]
    IndexOutOfRange {
        kind: InventoryKind,
        index: u32,
        max: u32,
    },
    #[error("{kind} index must be >= 1")]
    ZeroIndex { kind: InventoryKind },
}

/// Build the `fru-util` invocation for one read.
///
/// PSU without an index dumps all supplies (`psu -a`); SYS ignores the index.
pub fn inventory_command(
    cfg: &FruidConfig,
    kind: InventoryKind,
    index: Option<u32>,
) -> CommandSpec {
    let spec = CommandSpec::new(&cfg.fru_util).arg(kind.as_arg());
    match (kind, index) {
        (InventoryKind::Psu, None) => spec.arg("-a"),
        (InventoryKind::Psu | InventoryKind::Fan, Some(n)) => spec.arg(n.to_string()),
        (InventoryKind::Fan, None) | (InventoryKind::Sys, _) => spec,
    }
}

/// Read FRUID data for `kind` and wrap it in the inventory envelope.
///
/// Fans are always reported as an ordered list, one entry per slot. Without an
/// index every slot `1..=fan_count` is read; a slot that times out contributes
/// its partial output and the remaining slots still run.
#[instrument(skip_all, fields(kind = %kind, index = ?index))]
pub fn query_inventory<R: CommandRunner>(
    runner: &R,
    cfg: &FruidConfig,
    kind: InventoryKind,
    index: Option<u32>,
) -> Result<InventoryEnvelope, InventoryError> {
    if index == Some(0) {
        return Err(InventoryError::ZeroIndex { kind });
    }

    let information = match kind {
        InventoryKind::Fan => {
            let slots: Vec<u32> = match index {
                Some(n) if n > cfg.fan_count => {
                    return Err(InventoryError::IndexOutOfRange {
                        kind,
                        index: n,
                        max: cfg.fan_count,
                    });
                }
                Some(n) => vec![n],
                None => (1..=cfg.fan_count).collect(),
            };
            let mut entries = Vec::with_capacity(slots.len());
            for slot in slots {
                let spec = inventory_command(cfg, kind, Some(slot));
                entries.push(read_one(runner, cfg, &spec)?);
            }
            Information::Slots(entries)
        }
        InventoryKind::Psu | InventoryKind::Sys => {
            if kind == InventoryKind::Sys && index.is_some() {
                debug!("index ignored for sys read");
            }
            let spec = inventory_command(cfg, kind, index);
            Information::Text(read_one(runner, cfg, &spec)?)
        }
    };

    Ok(InventoryEnvelope::new(information))
}

fn read_one<R: CommandRunner>(
    runner: &R,
    cfg: &FruidConfig,
    spec: &CommandSpec,
) -> Result<String, ProcessError> {
    let result = runner.run(spec, cfg.timeout())?;
    if result.timed_out {
        warn!(
            command = %spec,
            captured_bytes = result.stdout.len(),
            "fru-util timed out, reporting partial output"
        );
    } else if !result.success() {
        warn!(
            command = %spec,
            exit_code = ?result.exit_code,
            stderr = %result.stderr_lossy().trim_end(),
            "fru-util exited with failure"
        );
    }
    Ok(result.stdout_lossy())
}

/// REST handler shape: the inventory envelope, or `{"result": "fail"}`.
pub fn fruid_action<R: CommandRunner>(
    runner: &R,
    cfg: &FruidConfig,
    kind: InventoryKind,
    index: Option<u32>,
) -> Value {
    match query_inventory(runner, cfg, kind, index) {
        Ok(envelope) => {
            info!(%kind, "fruid read complete");
            envelope.to_value()
        }
        Err(e) => {
            error!(%kind, err = %e, "fruid read failed");
            action_result(false)
        }
    }
}
