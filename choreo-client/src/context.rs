//! Per-process checkpoint context.
//!
//! Instrumented code cannot thread a client handle through the functions it
//! instruments, so the free functions here reach a context instead:
//!
//! - a context bound to the current task with [`scope`], used in-process
//! - otherwise the process context, installed once at startup with
//!   [`install`] and torn down when its [`ContextGuard`] drops
//!
//! ```ignore
//! let _guard = context::install_from_env_with_gc(definitions, runtime_gc)?;
//! context::run_background().await?;
//! // ... instrumented code calls context::reached("app::append", Position::Before)
//! ```

use choreo_core::{InstrumentationDefinition, Position};
use choreo_types::{
    ENV_INSTRUMENTABLE_PATHS, ENV_LIBRARY_PATHS, ENV_NODE, ENV_POLL_MAX_MS, ENV_POLL_MIN_MS,
    ENV_RECEIPT_TIMEOUT_MS, ENV_SERVER_ADDR,
};
use std::future::Future;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use thiserror::Error;
use tracing::info;

use crate::checkpoint::{Checkpoints, GcHook};
use crate::client::{ClientError, ClientTiming, CoordinationClient, PollBackoff};
use crate::transport::{HttpTransport, Transport, TransportError};

/// Checkpoints as stored in a context.
pub type SharedCheckpoints = Checkpoints<Arc<dyn Transport>>;

/// Context errors.
#[derive(Debug, Error)]
pub enum ContextError {
    /// A context is already installed in this process.
    #[error("checkpoint context already installed")]
    AlreadyInstalled,

    /// No context is installed.
    #[error("checkpoint context not installed")]
    NotInstalled,

    /// A required environment variable is missing.
    #[error("missing environment variable {0}")]
    MissingVar(&'static str),

    /// An environment variable has an unusable value.
    #[error("invalid value {value:?} for {var}")]
    InvalidVar {
        /// Variable name.
        var: &'static str,
        /// Offending value.
        value: String,
    },

    /// Building the transport failed.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// A checkpoint operation failed.
    #[error(transparent)]
    Client(#[from] ClientError),
}

/// Process-level configuration published to every node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessConfig {
    /// Coordination server address (`host:port`).
    pub server_address: String,
    /// Node this process runs as.
    pub node: Option<String>,
    /// Receipt timeout, when overridden.
    pub receipt_timeout: Option<Duration>,
    /// Poll backoff bounds, when overridden.
    pub poll_interval: Option<(Duration, Duration)>,
    /// Paths the instrumentor may rewrite.
    pub instrumentable_paths: Vec<PathBuf>,
    /// Library paths needed to load instrumented code.
    pub library_paths: Vec<PathBuf>,
}

impl ProcessConfig {
    /// Read the configuration from the process environment.
    pub fn from_env() -> Result<Self, ContextError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Read the configuration through `lookup` (variable name → value).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ContextError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let server_address = lookup(ENV_SERVER_ADDR)
            .filter(|v| !v.is_empty())
            .ok_or(ContextError::MissingVar(ENV_SERVER_ADDR))?;

        let millis = |var: &'static str| -> Result<Option<Duration>, ContextError> {
            match lookup(var) {
                Some(value) => match value.parse() {
                    Ok(ms) => Ok(Some(Duration::from_millis(ms))),
                    Err(_) => Err(ContextError::InvalidVar { var, value }),
                },
                None => Ok(None),
            }
        };

        let receipt_timeout = millis(ENV_RECEIPT_TIMEOUT_MS)?;
        let poll_interval = match (millis(ENV_POLL_MIN_MS)?, millis(ENV_POLL_MAX_MS)?) {
            (Some(min), Some(max)) => Some((min, max)),
            (Some(min), None) => Some((min, min)),
            (None, Some(_)) | (None, None) => None,
        };

        Ok(Self {
            server_address,
            node: lookup(ENV_NODE),
            receipt_timeout,
            poll_interval,
            instrumentable_paths: split_paths(lookup(ENV_INSTRUMENTABLE_PATHS)),
            library_paths: split_paths(lookup(ENV_LIBRARY_PATHS)),
        })
    }
}

fn split_paths(value: Option<String>) -> Vec<PathBuf> {
    value
        .map(|v| {
            v.split(':')
                .filter(|p| !p.is_empty())
                .map(PathBuf::from)
                .collect()
        })
        .unwrap_or_default()
}

/// The context installed for the whole process.
struct ProcessContext {
    checkpoints: Arc<SharedCheckpoints>,
    live: AtomicBool,
}

static PROCESS: OnceLock<ProcessContext> = OnceLock::new();

tokio::task_local! {
    static BOUND: Arc<SharedCheckpoints>;
}

/// Tears the process context down when dropped.
#[derive(Debug)]
#[must_use = "dropping the guard tears the context down"]
pub struct ContextGuard {
    _private: (),
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        if let Some(process) = PROCESS.get() {
            process.live.store(false, Ordering::Release);
            info!("checkpoint context torn down");
        }
    }
}

/// Install `checkpoints` as this process's context.
///
/// A process installs its context once. After the guard is dropped the
/// free functions report [`ContextError::NotInstalled`].
pub fn install(checkpoints: SharedCheckpoints) -> Result<ContextGuard, ContextError> {
    let context = ProcessContext {
        checkpoints: Arc::new(checkpoints),
        live: AtomicBool::new(true),
    };
    PROCESS
        .set(context)
        .map_err(|_| ContextError::AlreadyInstalled)?;
    Ok(ContextGuard { _private: () })
}

/// Install a context talking HTTP to the server named in the environment.
pub fn install_from_env(
    definitions: Vec<InstrumentationDefinition>,
) -> Result<ContextGuard, ContextError> {
    install(checkpoints_from_env(definitions, None)?)
}

/// [`install_from_env`] for a runtime that can force garbage collection.
pub fn install_from_env_with_gc(
    definitions: Vec<InstrumentationDefinition>,
    hook: Arc<dyn GcHook>,
) -> Result<ContextGuard, ContextError> {
    install(checkpoints_from_env(definitions, Some(hook))?)
}

/// Build checkpoints from the process environment without installing them.
pub fn checkpoints_from_env(
    definitions: Vec<InstrumentationDefinition>,
    gc: Option<Arc<dyn GcHook>>,
) -> Result<SharedCheckpoints, ContextError> {
    let config = ProcessConfig::from_env()?;
    let transport: Arc<dyn Transport> = Arc::new(HttpTransport::new(&config.server_address)?);

    let mut timing = ClientTiming::default();
    if let Some(timeout) = config.receipt_timeout {
        timing.receipt_timeout = timeout;
    }
    if let Some((min, max)) = config.poll_interval {
        timing.backoff = PollBackoff::new(min, max);
    }

    info!(
        server = %config.server_address,
        node = config.node.as_deref().unwrap_or("-"),
        definitions = definitions.len(),
        gc_hook = gc.is_some(),
        "building checkpoint context"
    );
    let checkpoints = Checkpoints::new(
        CoordinationClient::with_timing(transport, timing),
        definitions,
    );
    Ok(match gc {
        Some(hook) => checkpoints.with_gc_hook(hook),
        None => checkpoints,
    })
}

/// Run `future` with `checkpoints` bound as its context.
///
/// The binding covers `future` only; tasks it spawns fall back to the
/// process context.
pub async fn scope<F>(checkpoints: Arc<SharedCheckpoints>, future: F) -> F::Output
where
    F: Future,
{
    BOUND.scope(checkpoints, future).await
}

/// The context in effect: the bound one, else the live process context.
pub fn current() -> Option<Arc<SharedCheckpoints>> {
    BOUND.try_with(Arc::clone).ok().or_else(|| {
        PROCESS
            .get()
            .filter(|process| process.live.load(Ordering::Acquire))
            .map(|process| process.checkpoints.clone())
    })
}

fn require() -> Result<Arc<SharedCheckpoints>, ContextError> {
    current().ok_or(ContextError::NotInstalled)
}

/// `block_and_poll` through the context.
pub async fn block_and_poll(event: &str) -> Result<(), ContextError> {
    Ok(require()?.client().block_and_poll(event).await?)
}

/// `send_event` through the context.
pub async fn send_event(event: &str) -> Result<(), ContextError> {
    Ok(require()?.client().send_event(event).await?)
}

/// Report that instrumented code reached `location`.
pub async fn reached(location: &str, position: Position) -> Result<(), ContextError> {
    Ok(require()?.reached(location, position).await?)
}

/// Run the context's background definitions (garbage collection events).
///
/// Node processes call this once after startup.
pub async fn run_background() -> Result<(), ContextError> {
    Ok(require()?.run_background().await?)
}
