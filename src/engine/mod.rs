//! Engine abstraction for materializing resolved descriptors.
//!
//! The provisioning engine itself lives outside this crate. The
//! [`Engine`] trait is the seam the provisioner hands resolved descriptors
//! across; plan actions are decided here, against the state recorded by the
//! previous run, so every engine sees the same create/update/replace
//! decisions.

mod dry_run;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::graph::{ResolvedDescriptor, ResourceKind};
use crate::output::Attributes;
use crate::types::LogicalName;

pub use dry_run::{DryRunEngine, DryRunError};

/// Engine decision for one descriptor.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanAction {
    /// No prior resource exists.
    Create,
    /// Properties changed in place.
    Update,
    /// A replace-on-change property or the kind changed; the resource is
    /// recreated.
    Replace,
    /// Properties match the prior run.
    Unchanged,
}

impl PlanAction {
    /// Lower-case action label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Replace => "replace",
            Self::Unchanged => "unchanged",
        }
    }
}

impl fmt::Display for PlanAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Recorded outcome of materializing one resource.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AppliedResource {
    /// Resource kind.
    pub kind: ResourceKind,
    /// Properties the resource was materialized with.
    pub properties: BTreeMap<String, Value>,
    /// Attributes reported for the resource.
    pub attributes: Attributes,
}

/// Applied resources from a previous run, keyed by logical name.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AppliedState {
    resources: BTreeMap<LogicalName, AppliedResource>,
}

impl AppliedState {
    /// Creates an empty state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a resource, replacing any earlier entry.
    pub fn insert(&mut self, name: LogicalName, resource: AppliedResource) {
        self.resources.insert(name, resource);
    }

    /// Applied resource recorded under `name`.
    #[must_use]
    pub fn get(&self, name: &LogicalName) -> Option<&AppliedResource> {
        self.resources.get(name)
    }

    /// Number of recorded resources.
    #[must_use]
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    /// Whether nothing has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Recorded resources ordered by logical name.
    pub fn iter(&self) -> impl Iterator<Item = (&LogicalName, &AppliedResource)> {
        self.resources.iter()
    }

    /// Parses a state previously written by [`to_json`](Self::to_json).
    ///
    /// # Errors
    ///
    /// Returns the `serde_json` error when `input` is not a valid state
    /// document.
    pub fn from_json(input: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(input)
    }

    /// Serialises the state as pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns the `serde_json` error when serialisation fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// Work handed to an engine for one managed resource.
#[derive(Clone, Debug, PartialEq)]
pub struct Step {
    /// Descriptor with concrete properties.
    pub resolved: ResolvedDescriptor,
    /// Decided action; never [`PlanAction::Unchanged`] when handed to an
    /// engine.
    pub action: PlanAction,
    /// Resource recorded by the previous run, if any.
    pub prior: Option<AppliedResource>,
}

/// Property names whose values differ between `prior` and `resolved`.
#[must_use]
pub fn changed_properties(
    prior: &BTreeMap<String, Value>,
    resolved: &BTreeMap<String, Value>,
) -> BTreeSet<String> {
    prior
        .keys()
        .chain(resolved.keys())
        .filter(|key| prior.get(*key) != resolved.get(*key))
        .cloned()
        .collect()
}

/// Decides the action for `resolved` given the prior applied resource.
#[must_use]
pub fn plan_action(
    prior: Option<&AppliedResource>,
    resolved: &ResolvedDescriptor,
    replace_on_changes: &BTreeSet<String>,
) -> PlanAction {
    let Some(prior) = prior else {
        return PlanAction::Create;
    };
    if prior.kind != resolved.kind {
        return PlanAction::Replace;
    }
    let changed = changed_properties(&prior.properties, &resolved.properties);
    if changed.is_empty() {
        PlanAction::Unchanged
    } else if changed.iter().any(|key| replace_on_changes.contains(key)) {
        PlanAction::Replace
    } else {
        PlanAction::Update
    }
}

/// Future returned by engine operations.
pub type EngineFuture<'a, T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'a>>;

/// Interface implemented by provisioning engines.
pub trait Engine {
    /// Engine specific error type.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Resolves a read-only lookup (for example a machine image query) and
    /// returns its attributes.
    fn lookup<'a>(
        &'a self,
        descriptor: &'a ResolvedDescriptor,
    ) -> EngineFuture<'a, Attributes, Self::Error>;

    /// Creates, updates, or replaces a managed resource and returns its
    /// attributes.
    fn materialize<'a>(&'a self, step: &'a Step) -> EngineFuture<'a, Attributes, Self::Error>;
}
