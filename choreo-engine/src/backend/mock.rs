//! Mock backend for testing.
//!
//! Records every call and lets tests script failures and exec output.

use super::{ExecResult, NodeBackend};
use crate::error::{RuntimeError, RuntimeResult};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A call received by [`MockBackend`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendCall {
    /// `start(node)`
    Start(String),
    /// `stop(node, grace)`
    Stop(String, Duration),
    /// `kill(node)`
    Kill(String),
    /// `restart(node, grace)`
    Restart(String, Duration),
    /// `exec(node, cmd)`
    Exec(String, Vec<String>),
}

/// Mock backend for testing.
///
/// Addresses default to `10.0.0.<n>` in order of first lookup unless set.
#[derive(Debug, Default)]
pub struct MockBackend {
    inner: Arc<Mutex<MockBackendInner>>,
}

#[derive(Debug, Default)]
struct MockBackendInner {
    calls: Vec<BackendCall>,
    addresses: HashMap<String, String>,
    exec_results: VecDeque<ExecResult>,
    fail_next: Option<String>,
}

impl MockBackend {
    /// Create a new mock backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fix the address reported for `node`.
    pub fn set_address(&self, node: &str, address: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.addresses.insert(node.to_string(), address.to_string());
    }

    /// Queue the result of the next `exec`; later calls succeed with no output.
    pub fn queue_exec_result(&self, result: ExecResult) {
        let mut inner = self.inner.lock().unwrap();
        inner.exec_results.push_back(result);
    }

    /// Cause the next call to fail with the given error.
    pub fn fail_next_command(&self, error: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.fail_next = Some(error.to_string());
    }

    /// Get all calls received so far.
    pub fn calls(&self) -> Vec<BackendCall> {
        let inner = self.inner.lock().unwrap();
        inner.calls.clone()
    }

    /// Commands executed inside `node`.
    pub fn execs_on(&self, node: &str) -> Vec<Vec<String>> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                BackendCall::Exec(n, cmd) if n == node => Some(cmd),
                _ => None,
            })
            .collect()
    }

    /// Clear all state.
    pub fn reset(&self) {
        let mut inner = self.inner.lock().unwrap();
        *inner = MockBackendInner::default();
    }

    fn record(&self, call: BackendCall) -> RuntimeResult<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(call);
        match inner.fail_next.take() {
            Some(error) => Err(RuntimeError::Backend(error)),
            None => Ok(()),
        }
    }
}

impl Clone for MockBackend {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

#[async_trait]
impl NodeBackend for MockBackend {
    async fn start(&self, node: &str) -> RuntimeResult<()> {
        self.record(BackendCall::Start(node.to_string()))
    }

    async fn stop(&self, node: &str, grace: Duration) -> RuntimeResult<()> {
        self.record(BackendCall::Stop(node.to_string(), grace))
    }

    async fn kill(&self, node: &str) -> RuntimeResult<()> {
        self.record(BackendCall::Kill(node.to_string()))
    }

    async fn restart(&self, node: &str, grace: Duration) -> RuntimeResult<()> {
        self.record(BackendCall::Restart(node.to_string(), grace))
    }

    async fn exec(&self, node: &str, cmd: &[String]) -> RuntimeResult<ExecResult> {
        self.record(BackendCall::Exec(node.to_string(), cmd.to_vec()))?;
        let mut inner = self.inner.lock().unwrap();
        Ok(inner.exec_results.pop_front().unwrap_or_default())
    }

    async fn address(&self, node: &str) -> RuntimeResult<String> {
        let mut inner = self.inner.lock().unwrap();
        let next = inner.addresses.len() + 1;
        let address = inner
            .addresses
            .entry(node.to_string())
            .or_insert_with(|| format!("10.0.0.{}", next));
        Ok(address.clone())
    }
}
