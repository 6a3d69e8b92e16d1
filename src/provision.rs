//! Drives an [`Engine`] through a [`Stack`] wave by wave.
//!
//! Every descriptor is resolved against the attributes stored by earlier
//! waves, so nothing is handed to the engine before its dependencies exist.
//! Lookups are re-run on every pass, the bootstrap script is computed
//! locally, and managed resources whose properties match the prior state
//! keep their recorded attributes without an engine call. The first failure
//! stops the pass; retries are the engine's concern.

use thiserror::Error;
use tracing::{debug, info};

use crate::control_panel::BoundControlPanel;
use crate::engine::{AppliedResource, AppliedState, Engine, PlanAction, Step, plan_action};
use crate::graph::{Materialization, ResolvedDescriptor, ResourceDescriptor};
use crate::output::{AttributeStore, Attributes, ResolveError};
use crate::stack::{ResolvedOutputs, Stack};
use crate::types::LogicalName;

/// Errors surfaced while provisioning a stack.
#[derive(Debug, Error)]
pub enum ProvisionError<EngineError>
where
    EngineError: std::error::Error + 'static,
{
    /// Raised when the engine fails to materialize or look up a resource.
    #[error("failed to materialize `{resource}`: {source}")]
    Materialize {
        /// Logical name of the failing resource.
        resource: LogicalName,
        /// Engine-specific error.
        #[source]
        source: EngineError,
    },
    /// Raised when a descriptor's properties cannot be resolved.
    #[error("failed to resolve properties of `{resource}`: {source}")]
    Resolve {
        /// Logical name of the descriptor.
        resource: LogicalName,
        /// Underlying resolution error.
        #[source]
        source: ResolveError,
    },
    /// Raised when a computed resource lacks the property it is computed
    /// from.
    #[error("computed resource `{resource}` has no `{property}` property")]
    MissingProperty {
        /// Logical name of the descriptor.
        resource: LogicalName,
        /// Missing property.
        property: String,
    },
    /// Raised when the published outputs cannot be resolved.
    #[error("failed to resolve stack outputs: {0}")]
    Outputs(#[source] ResolveError),
}

/// Action taken for one resource.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AppliedAction {
    /// Logical name.
    pub resource: LogicalName,
    /// Decided action.
    pub action: PlanAction,
}

/// Result of a successful provisioning pass.
#[derive(Debug)]
pub struct ProvisionReport {
    /// Published outputs.
    pub outputs: ResolvedOutputs,
    /// State to hand to the next pass.
    pub state: AppliedState,
    /// Actions in the order they were taken.
    pub actions: Vec<AppliedAction>,
    /// Control panel bound to the instance address.
    pub control_panel: BoundControlPanel,
}

impl ProvisionReport {
    /// Action taken for `resource`, if it was visited.
    #[must_use]
    pub fn action_for(&self, resource: &str) -> Option<PlanAction> {
        self.actions
            .iter()
            .find(|applied| applied.resource.as_str() == resource)
            .map(|applied| applied.action)
    }
}

/// Applies stacks through an engine.
#[derive(Debug)]
pub struct Provisioner<E> {
    engine: E,
    prior: AppliedState,
}

impl<E> Provisioner<E>
where
    E: Engine,
{
    /// Creates a provisioner with no prior state.
    #[must_use]
    pub fn new(engine: E) -> Self {
        Self {
            engine,
            prior: AppliedState::new(),
        }
    }

    /// Sets the state recorded by a previous pass.
    #[must_use]
    pub fn with_prior_state(mut self, prior: AppliedState) -> Self {
        self.prior = prior;
        self
    }

    /// Engine in use.
    #[must_use]
    pub const fn engine(&self) -> &E {
        &self.engine
    }

    /// Materializes every resource of `stack` in dependency order.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::Materialize`] naming the first resource the
    /// engine fails on; later resources are not attempted.
    pub async fn apply(&self, stack: &Stack) -> Result<ProvisionReport, ProvisionError<E::Error>> {
        let graph = stack.graph();
        let mut store = AttributeStore::new();
        let mut state = AppliedState::new();
        let mut actions = Vec::with_capacity(graph.len());

        for (wave_index, wave) in graph.waves().into_iter().enumerate() {
            debug!(wave = wave_index, resources = wave.len(), "applying wave");
            for name in wave {
                let Some(descriptor) = graph.descriptor(&name) else {
                    continue;
                };
                let resolved =
                    descriptor
                        .resolve(&store)
                        .map_err(|source| ProvisionError::Resolve {
                            resource: name.clone(),
                            source,
                        })?;
                let prior = self.prior.get(&name);
                let action = plan_action(prior, &resolved, descriptor.replace_on_changes());
                let attributes = self
                    .materialize(descriptor, &resolved, action, prior)
                    .await?;
                info!(
                    resource = %name,
                    kind = %descriptor.kind(),
                    action = %action,
                    "resource applied"
                );

                store.insert(name.clone(), attributes.clone());
                state.insert(
                    name.clone(),
                    AppliedResource {
                        kind: resolved.kind,
                        properties: resolved.properties,
                        attributes,
                    },
                );
                actions.push(AppliedAction {
                    resource: name,
                    action,
                });
            }
        }

        let outputs = stack
            .outputs()
            .resolve(&store)
            .map_err(ProvisionError::Outputs)?;
        let control_panel = stack
            .control_panel()
            .bind(&store)
            .map_err(ProvisionError::Outputs)?;
        Ok(ProvisionReport {
            outputs,
            state,
            actions,
            control_panel,
        })
    }

    async fn materialize(
        &self,
        descriptor: &ResourceDescriptor,
        resolved: &ResolvedDescriptor,
        action: PlanAction,
        prior: Option<&AppliedResource>,
    ) -> Result<Attributes, ProvisionError<E::Error>> {
        let name = descriptor.name();
        match descriptor.kind().materialization() {
            Materialization::Lookup => {
                self.engine
                    .lookup(resolved)
                    .await
                    .map_err(|source| ProvisionError::Materialize {
                        resource: name.clone(),
                        source,
                    })
            }
            Materialization::Computed => computed_attributes(resolved),
            Materialization::Managed => {
                if let (PlanAction::Unchanged, Some(recorded)) = (action, prior) {
                    return Ok(recorded.attributes.clone());
                }
                let step = Step {
                    resolved: resolved.clone(),
                    action,
                    prior: prior.cloned(),
                };
                self.engine
                    .materialize(&step)
                    .await
                    .map_err(|source| ProvisionError::Materialize {
                        resource: name.clone(),
                        source,
                    })
            }
        }
    }
}

fn computed_attributes<E>(resolved: &ResolvedDescriptor) -> Result<Attributes, ProvisionError<E>>
where
    E: std::error::Error + 'static,
{
    let content = resolved
        .str_property("content")
        .ok_or_else(|| ProvisionError::MissingProperty {
            resource: resolved.name.clone(),
            property: String::from("content"),
        })?;
    let digest = crate::bootstrap::digest(content);
    debug!(resource = %resolved.name, sha256 = %digest, bytes = content.len(), "computed resource");
    Ok(Attributes::from([
        (String::from("content"), content.to_owned()),
        (String::from("sha256"), digest),
    ]))
}
