//! Test support utilities shared across unit and integration tests.

use std::collections::{BTreeMap, BTreeSet};
use std::env;
use std::ffi::OsString;
use std::sync::{Mutex as StdMutex, PoisonError};

use thiserror::Error;
use tokio::sync::{Mutex, MutexGuard};

use crate::engine::{DryRunEngine, DryRunError, Engine, EngineFuture, PlanAction, Step};
use crate::graph::ResolvedDescriptor;
use crate::output::Attributes;
use crate::types::LogicalName;

/// Records a single call made through [`RecordingEngine`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EngineCall {
    /// Resource the call was made for.
    pub resource: LogicalName,
    /// Action requested; `None` for lookups.
    pub action: Option<PlanAction>,
}

/// Errors returned by [`RecordingEngine`].
#[derive(Debug, Error, Eq, PartialEq)]
pub enum RecordingEngineError {
    /// Failure scripted with [`RecordingEngine::fail_on`].
    #[error("scripted failure: {message}")]
    Scripted {
        /// Message supplied when scripting the failure.
        message: String,
    },
    /// Failure from the wrapped dry-run engine.
    #[error(transparent)]
    DryRun(#[from] DryRunError),
}

/// Engine double that records every call and fails on demand.
///
/// Attributes come from a wrapped [`DryRunEngine`] unless overridden with
/// [`RecordingEngine::with_attributes`].
#[derive(Debug, Default)]
pub struct RecordingEngine {
    inner: DryRunEngine,
    calls: StdMutex<Vec<EngineCall>>,
    failures: BTreeMap<LogicalName, String>,
    overrides: BTreeMap<LogicalName, Attributes>,
}

impl RecordingEngine {
    /// Creates an engine with no scripted failures.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every call for `resource` fail with `message`.
    #[must_use]
    pub fn fail_on(mut self, resource: &str, message: &str) -> Self {
        self.failures
            .insert(LogicalName::from(resource), message.to_owned());
        self
    }

    /// Returns `attributes` for `resource` instead of fabricated ones.
    #[must_use]
    pub fn with_attributes(mut self, resource: &str, attributes: &[(&str, &str)]) -> Self {
        let values = attributes
            .iter()
            .map(|(key, value)| ((*key).to_owned(), (*value).to_owned()))
            .collect();
        self.overrides.insert(LogicalName::from(resource), values);
        self
    }

    /// Snapshot of the calls recorded so far.
    #[must_use]
    pub fn calls(&self) -> Vec<EngineCall> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Resources the engine was called for, in call order.
    #[must_use]
    pub fn called_resources(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .map(|call| call.resource.as_str().to_owned())
            .collect()
    }

    fn record(
        &self,
        resource: &LogicalName,
        action: Option<PlanAction>,
    ) -> Result<Option<Attributes>, RecordingEngineError> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(EngineCall {
                resource: resource.clone(),
                action,
            });
        if let Some(message) = self.failures.get(resource) {
            return Err(RecordingEngineError::Scripted {
                message: message.clone(),
            });
        }
        Ok(self.overrides.get(resource).cloned())
    }
}

impl Engine for RecordingEngine {
    type Error = RecordingEngineError;

    fn lookup<'a>(
        &'a self,
        descriptor: &'a ResolvedDescriptor,
    ) -> EngineFuture<'a, Attributes, Self::Error> {
        Box::pin(async move {
            if let Some(attributes) = self.record(&descriptor.name, None)? {
                return Ok(attributes);
            }
            Ok(self.inner.lookup(descriptor).await?)
        })
    }

    fn materialize<'a>(&'a self, step: &'a Step) -> EngineFuture<'a, Attributes, Self::Error> {
        Box::pin(async move {
            if let Some(attributes) = self.record(&step.resolved.name, Some(step.action))? {
                return Ok(attributes);
            }
            Ok(self.inner.materialize(step).await?)
        })
    }
}

/// OpenSSH public key accepted by configuration validation.
pub const SAMPLE_SSH_PUBLIC_KEY: &str =
    "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIBlockhostTestKeyOnlyNotForUse blockhost@test";

/// Global mutex used to serialise environment mutation in tests.
pub static ENV_LOCK: Mutex<()> = Mutex::const_new(());

/// Guard that holds the env mutex and cleans up variables on drop.
pub struct EnvGuard {
    previous: Vec<(String, Option<OsString>)>,
    _guard: MutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Sets multiple environment variables while holding a global mutex.
    pub async fn set_vars(pairs: &[(&str, &str)]) -> Self {
        Self::apply(pairs, &[]).await
    }

    /// Sets `pairs` and removes `removed` while holding the global mutex.
    pub async fn apply(pairs: &[(&str, &str)], removed: &[&str]) -> Self {
        debug_assert!(
            {
                let mut seen = BTreeSet::new();
                pairs
                    .iter()
                    .map(|(key, _)| *key)
                    .chain(removed.iter().copied())
                    .all(|key| seen.insert(key))
            },
            "duplicate environment variable keys passed to EnvGuard"
        );

        let guard = ENV_LOCK.lock().await;
        let mut previous = Vec::with_capacity(pairs.len() + removed.len());
        for (key, value) in pairs {
            let old = env::var_os(key);
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`, preventing races.
            unsafe { env::set_var(key, value) };
            previous.push(((*key).to_owned(), old));
        }
        for key in removed {
            let old = env::var_os(key);
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`, preventing races.
            unsafe { env::remove_var(key) };
            previous.push(((*key).to_owned(), old));
        }

        Self {
            previous,
            _guard: guard,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, old) in &self.previous {
            // SAFETY: Environment mutation is serialised by holding `_guard`.
            unsafe {
                match old {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
        }
    }
}
