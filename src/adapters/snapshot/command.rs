//! Snapshotters backed by the stock Windows tools (`reg`, `sc`, `powercfg`).
//!
//! Output parsing lives in pure functions so it can be tested on any host. Where a tool is
//! missing the spawn fails with `NotFound`, which surfaces as a capture or restore error.
use std::io;
use std::path::Path;
use std::process::{Command, Output, Stdio};

use serde::{Deserialize, Serialize};

use super::Snapshotter;
use crate::fs::atomic::write_atomic;
use crate::types::{PriorState, Resource, ResourceKind};

fn run(program: &str, args: &[&str]) -> io::Result<Output> {
    log::debug!("exec {program} {}", args.join(" "));
    Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .output()
}

fn run_ok(program: &str, args: &[&str]) -> io::Result<String> {
    let out = run(program, args)?;
    if out.status.success() {
        return Ok(String::from_utf8_lossy(&out.stdout).into_owned());
    }
    Err(io::Error::other(format!(
        "{program} {} exited with {}: {}",
        args.first().copied().unwrap_or_default(),
        out.status,
        String::from_utf8_lossy(&out.stderr).trim()
    )))
}

/// Exit code of a finished command, or the spawn error.
fn exit_code(program: &str, args: &[&str]) -> io::Result<Option<i32>> {
    Ok(run(program, args)?.status.code())
}

fn write_json<T: Serialize>(payload: &Path, value: &T) -> io::Result<()> {
    let bytes = serde_json::to_vec_pretty(value).map_err(io::Error::other)?;
    write_atomic(payload, &bytes)
}

fn read_json<T: for<'de> Deserialize<'de>>(payload: &Path) -> io::Result<T> {
    let bytes = std::fs::read(payload)?;
    serde_json::from_slice(&bytes).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// `reg export` on capture; `reg delete` + `reg import` on restore so values the mutation
/// added are dropped as well.
#[derive(Debug, Default, Clone, Copy)]
pub struct RegistrySnapshotter;

impl RegistrySnapshotter {
    fn key_exists(key: &str) -> io::Result<bool> {
        Ok(exit_code("reg", &["query", key])? == Some(0))
    }
}

impl Snapshotter for RegistrySnapshotter {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Registry
    }

    fn capture(&self, resource: &Resource, payload: &Path) -> io::Result<PriorState> {
        let key = resource.locator.as_str();
        if !Self::key_exists(key)? {
            write_atomic(payload, b"")?;
            return Ok(PriorState::Absent);
        }
        let out = payload.to_string_lossy();
        run_ok("reg", &["export", key, &out, "/y"])?;
        Ok(PriorState::Captured)
    }

    fn restore(&self, resource: &Resource, payload: &Path, prior: PriorState) -> io::Result<()> {
        let key = resource.locator.as_str();
        if Self::key_exists(key)? {
            run_ok("reg", &["delete", key, "/f"])?;
        }
        if prior == PriorState::Absent {
            return Ok(());
        }
        let input = payload.to_string_lossy();
        run_ok("reg", &["import", &input])?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceState {
    pub name: String,
    /// Value for `sc config <name> start= <start_type>`.
    pub start_type: String,
    pub running: bool,
}

/// `START_TYPE` line of `sc qc` mapped to the `sc config start=` vocabulary.
pub(crate) fn parse_sc_start_type(qc: &str) -> Option<String> {
    let line = qc
        .lines()
        .find(|l| l.trim_start().starts_with("START_TYPE"))?;
    let value = line.split_once(':')?.1.trim();
    let code = value.split_whitespace().next()?;
    let delayed = value.contains("DELAYED");
    let s = match code {
        "0" => "boot",
        "1" => "system",
        "2" if delayed => "delayed-auto",
        "2" => "auto",
        "3" => "demand",
        "4" => "disabled",
        _ => return None,
    };
    Some(s.to_string())
}

/// `STATE` line of `sc query`: code 4 is RUNNING.
pub(crate) fn parse_sc_running(query: &str) -> Option<bool> {
    let line = query
        .lines()
        .find(|l| l.trim_start().starts_with("STATE"))?;
    let code = line.split_once(':')?.1.split_whitespace().next()?;
    Some(code == "4")
}

// sc.exe exit codes
const ERROR_SERVICE_DOES_NOT_EXIST: i32 = 1060;
const ERROR_SERVICE_ALREADY_RUNNING: i32 = 1056;
const ERROR_SERVICE_NOT_ACTIVE: i32 = 1062;

/// `sc qc` / `sc query` on capture; `sc config` then `sc start` or `sc stop` on restore.
#[derive(Debug, Default, Clone, Copy)]
pub struct ServiceSnapshotter;

impl Snapshotter for ServiceSnapshotter {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Service
    }

    fn capture(&self, resource: &Resource, payload: &Path) -> io::Result<PriorState> {
        let name = resource.locator.as_str();
        let qc = run("sc", &["qc", name])?;
        if qc.status.code() == Some(ERROR_SERVICE_DOES_NOT_EXIST) {
            write_atomic(payload, b"")?;
            return Ok(PriorState::Absent);
        }
        if !qc.status.success() {
            return Err(io::Error::other(format!("sc qc {name} exited with {}", qc.status)));
        }
        let start_type = parse_sc_start_type(&String::from_utf8_lossy(&qc.stdout))
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "no START_TYPE in sc qc"))?;
        let running = parse_sc_running(&run_ok("sc", &["query", name])?)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "no STATE in sc query"))?;
        write_json(
            payload,
            &ServiceState {
                name: name.to_string(),
                start_type,
                running,
            },
        )?;
        Ok(PriorState::Captured)
    }

    fn restore(&self, resource: &Resource, payload: &Path, prior: PriorState) -> io::Result<()> {
        let name = resource.locator.as_str();
        if prior == PriorState::Absent {
            // The service did not exist before; remove it if it does now.
            if exit_code("sc", &["qc", name])? == Some(0) {
                let _ = exit_code("sc", &["stop", name])?;
                run_ok("sc", &["delete", name])?;
            }
            return Ok(());
        }
        let state: ServiceState = read_json(payload)?;
        let start = state.start_type.as_str();
        run_ok("sc", &["config", name, "start=", start])?;
        let (verb, benign) = if state.running {
            ("start", ERROR_SERVICE_ALREADY_RUNNING)
        } else {
            ("stop", ERROR_SERVICE_NOT_ACTIVE)
        };
        match exit_code("sc", &[verb, name])? {
            Some(0) => Ok(()),
            Some(c) if c == benign => Ok(()),
            other => Err(io::Error::other(format!("sc {verb} {name} exited with {other:?}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Power plan
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PowerScheme {
    pub active_scheme: String,
    pub name: Option<String>,
}

/// `Power Scheme GUID: <guid>  (<name>)` as printed by `powercfg /getactivescheme`.
pub(crate) fn parse_active_scheme(text: &str) -> Option<PowerScheme> {
    let rest = text.split_once("GUID:")?.1.trim();
    let guid = rest.split_whitespace().next()?.to_string();
    let name = rest
        .split_once('(')
        .and_then(|(_, n)| n.split_once(')'))
        .map(|(n, _)| n.to_string());
    Some(PowerScheme {
        active_scheme: guid,
        name,
    })
}

/// Records the active scheme; restore re-activates it. The locator is informational.
#[derive(Debug, Default, Clone, Copy)]
pub struct PowerPlanSnapshotter;

impl Snapshotter for PowerPlanSnapshotter {
    fn kind(&self) -> ResourceKind {
        ResourceKind::PowerPlan
    }

    fn capture(&self, _resource: &Resource, payload: &Path) -> io::Result<PriorState> {
        let text = run_ok("powercfg", &["/getactivescheme"])?;
        let scheme = parse_active_scheme(&text).ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidData, "unrecognized powercfg output")
        })?;
        write_json(payload, &scheme)?;
        Ok(PriorState::Captured)
    }

    fn restore(&self, _resource: &Resource, payload: &Path, _prior: PriorState) -> io::Result<()> {
        let scheme: PowerScheme = read_json(payload)?;
        run_ok("powercfg", &["/setactive", &scheme.active_scheme])?;
        Ok(())
    }
}
