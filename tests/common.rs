//! Shared test helpers for the tweakyard integration tests.
#![allow(dead_code, clippy::unwrap_used)]

use std::collections::HashMap;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::Level;
use serde_json::Value;

use tweakyard::adapters::{Snapshotter, SystemProbe};
use tweakyard::logging::{AuditSink, FactsEmitter};
use tweakyard::mutation::{CancellationToken, Mutation};
use tweakyard::policy::Policy;
use tweakyard::types::{
    BackupRecord, MutationDescriptor, OperationResult, PriorState, Resource, ResourceKind,
};
use tweakyard::{ApiBuilder, Tweakyard};

/// A simple in-memory emitter to capture facts during tests.
#[derive(Clone, Default, Debug)]
pub struct TestEmitter {
    pub events: Arc<Mutex<Vec<(String, String, String, Value)>>>,
}

impl FactsEmitter for TestEmitter {
    fn emit(&self, subsystem: &str, event: &str, decision: &str, fields: Value) {
        self.events
            .lock()
            .unwrap()
            .push((subsystem.into(), event.into(), decision.into(), fields));
    }
}

impl TestEmitter {
    /// `(decision, step)` of every event of `phase` for `mutation_id`, in order.
    pub fn steps(&self, mutation_id: &str, phase: &str) -> Vec<(String, String)> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, event, _, f)| event == phase && f["mutation_id"] == mutation_id)
            .map(|(_, _, decision, f)| {
                (
                    decision.clone(),
                    f["step"].as_str().unwrap_or_default().to_string(),
                )
            })
            .collect()
    }
}

/// A no-op audit sink for tests.
#[derive(Clone, Default)]
pub struct TestAudit;

impl AuditSink for TestAudit {
    fn log(&self, _level: Level, _msg: &str) {}
}

/// Host facts under test control.
#[derive(Clone)]
pub struct FakeProbe {
    pub elevated: bool,
    pub processes: Vec<String>,
    pub available: u64,
    /// Process listing and free-space queries fail.
    pub blind: bool,
}

impl FakeProbe {
    pub fn permissive() -> Self {
        Self {
            elevated: true,
            processes: vec!["explorer.exe".into(), "svchost.exe".into()],
            available: 1 << 40,
            blind: false,
        }
    }
}

impl SystemProbe for FakeProbe {
    fn is_elevated(&self) -> bool {
        self.elevated
    }

    fn running_processes(&self) -> io::Result<Vec<String>> {
        if self.blind {
            return Err(io::Error::other("tasklist not found"));
        }
        Ok(self.processes.clone())
    }

    fn available_bytes(&self, _path: &Path) -> io::Result<u64> {
        if self.blind {
            return Err(io::Error::other("volume query failed"));
        }
        Ok(self.available)
    }
}

/// Stand-in for system settings: `Custom` resources are keys in this map.
#[derive(Clone, Default)]
pub struct Live {
    values: Arc<Mutex<HashMap<String, String>>>,
}

impl Live {
    pub fn set(&self, key: &str, value: &str) {
        self.values
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.values.lock().unwrap().get(key).cloned()
    }

    pub fn remove(&self, key: &str) {
        self.values.lock().unwrap().remove(key);
    }
}

/// Snapshotter for `Custom` resources backed by `Live`. `fail_restore` injects an
/// I/O failure into every restore.
#[derive(Clone, Default)]
pub struct MemorySnapshotter {
    pub live: Live,
    pub fail_restore: Arc<AtomicBool>,
}

impl Snapshotter for MemorySnapshotter {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Custom
    }

    fn capture(&self, resource: &Resource, payload: &Path) -> io::Result<PriorState> {
        match self.live.get(&resource.locator) {
            Some(v) => {
                std::fs::write(payload, v)?;
                Ok(PriorState::Captured)
            }
            None => {
                std::fs::write(payload, b"")?;
                Ok(PriorState::Absent)
            }
        }
    }

    fn restore(&self, resource: &Resource, payload: &Path, prior: PriorState) -> io::Result<()> {
        if self.fail_restore.load(Ordering::SeqCst) {
            return Err(io::Error::other("injected restore failure"));
        }
        match prior {
            PriorState::Absent => self.live.remove(&resource.locator),
            _ => self
                .live
                .set(&resource.locator, &std::fs::read_to_string(payload)?),
        }
        Ok(())
    }

    fn estimate_size(&self, _resource: &Resource) -> u64 {
        64
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Behavior {
    Succeed,
    /// Changes the setting, then reports failure.
    FailMidway,
    /// Changes the setting, then waits for cancellation or `release`.
    Hang,
    /// Changes the setting, ignores cancellation until `release`, then writes `"late"`.
    Stubborn,
}

/// Sets each of its `Custom` keys to `"on"`.
pub struct Toggle {
    pub descriptor: MutationDescriptor,
    resources: Vec<Resource>,
    live: Live,
    pub behavior: Behavior,
    pub saw_cancel: Arc<AtomicBool>,
    pub release: Arc<AtomicBool>,
    pub compatible: bool,
    pub conflicts: Vec<&'static str>,
}

impl Toggle {
    pub fn new(id: &'static str, keys: &[&str], live: &Live) -> Self {
        Self {
            descriptor: MutationDescriptor::new(id, id, "Test"),
            resources: keys.iter().map(|k| Resource::custom(*k)).collect(),
            live: live.clone(),
            behavior: Behavior::Succeed,
            saw_cancel: Arc::new(AtomicBool::new(false)),
            release: Arc::new(AtomicBool::new(false)),
            compatible: true,
            conflicts: Vec::new(),
        }
    }

    pub fn with_resources(mut self, resources: Vec<Resource>) -> Self {
        self.resources = resources;
        self
    }

    pub fn behaving(mut self, behavior: Behavior) -> Self {
        self.behavior = behavior;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.descriptor.timeout = Some(timeout);
        self
    }
}

impl Mutation for Toggle {
    fn descriptor(&self) -> &MutationDescriptor {
        &self.descriptor
    }

    fn resources(&self) -> &[Resource] {
        &self.resources
    }

    fn conflicting_processes(&self) -> &[&str] {
        &self.conflicts
    }

    fn check_compatibility(&self) -> bool {
        self.compatible
    }

    fn simulate(&self) -> OperationResult {
        OperationResult::ok(format!("would switch {} setting(s) on", self.resources.len()))
    }

    fn apply(&self, cancel: &CancellationToken) -> OperationResult {
        for r in &self.resources {
            self.live.set(&r.locator, "on");
        }
        match self.behavior {
            Behavior::Succeed => OperationResult::ok("switched on"),
            Behavior::FailMidway => OperationResult::mutation_failure("second step failed"),
            Behavior::Hang => loop {
                if cancel.is_cancelled() {
                    self.saw_cancel.store(true, Ordering::SeqCst);
                    return OperationResult::mutation_failure("cancelled");
                }
                if self.release.load(Ordering::SeqCst) {
                    return OperationResult::ok("switched on");
                }
                std::thread::sleep(Duration::from_millis(5));
            },
            Behavior::Stubborn => {
                while !self.release.load(Ordering::SeqCst) {
                    std::thread::sleep(Duration::from_millis(5));
                }
                for r in &self.resources {
                    self.live.set(&r.locator, "late");
                }
                OperationResult::ok("switched on late")
            }
        }
    }

    fn revert(&self, _record: &BackupRecord) -> OperationResult {
        OperationResult::ok("settings restored")
    }
}

/// Builder rooted at `root` with a permissive probe and the in-memory snapshotter.
pub fn builder(
    root: &Path,
    facts: &TestEmitter,
    snap: &MemorySnapshotter,
    policy: Policy,
) -> ApiBuilder<TestEmitter, TestAudit> {
    Tweakyard::builder(facts.clone(), TestAudit, policy)
        .with_root(root)
        .with_probe(Box::new(FakeProbe::permissive()))
        .with_snapshotter(Arc::new(snap.clone()))
}

/// Poll `cond` until it holds or two seconds pass.
pub async fn eventually(mut cond: impl FnMut() -> bool) -> bool {
    for _ in 0..400 {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    false
}
