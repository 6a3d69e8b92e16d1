//! Engine that fabricates provider attributes without contacting a cloud.
//!
//! Identifiers carry a random suffix and instance addresses come from the
//! `192.0.2.0/24` documentation range, so nothing produced here can be
//! mistaken for a live resource.

use std::sync::atomic::{AtomicU8, Ordering};

use thiserror::Error;
use uuid::Uuid;

use super::{Engine, EngineFuture, PlanAction, Step};
use crate::bootstrap::digest;
use crate::graph::{Materialization, ResolvedDescriptor, ResourceKind};
use crate::output::Attributes;
use crate::types::LogicalName;

const DRY_RUN_ACCOUNT: &str = "000000000000";

/// Errors raised by [`DryRunEngine`].
#[derive(Debug, Error, Eq, PartialEq)]
pub enum DryRunError {
    /// Raised when a descriptor is routed to the wrong operation.
    #[error("resource `{resource}` of kind {kind} cannot be handled by this operation")]
    Unsupported {
        /// Logical name of the descriptor.
        resource: LogicalName,
        /// Kind of the descriptor.
        kind: ResourceKind,
    },
    /// Raised when a descriptor lacks a property the fabricated attributes
    /// are derived from.
    #[error("resource `{resource}` is missing property `{property}`")]
    MissingProperty {
        /// Logical name of the descriptor.
        resource: LogicalName,
        /// Missing property.
        property: String,
    },
}

/// Fabricates attributes for previews and tests.
#[derive(Debug, Default)]
pub struct DryRunEngine {
    next_host: AtomicU8,
}

impl DryRunEngine {
    /// Creates an engine whose first instance receives `192.0.2.10`.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            next_host: AtomicU8::new(0),
        }
    }

    fn suffix() -> String {
        let mut suffix = Uuid::new_v4().simple().to_string();
        suffix.truncate(8);
        suffix
    }

    fn next_address(&self) -> String {
        let offset = self.next_host.fetch_add(1, Ordering::Relaxed);
        format!("192.0.2.{}", offset.saturating_add(10))
    }

    // Lookups are queries, so the same filters always yield the same image.
    fn image(descriptor: &ResolvedDescriptor) -> Attributes {
        let pattern = descriptor
            .properties
            .get("filters")
            .and_then(|filters| filters.pointer("/0/values/0"))
            .and_then(serde_json::Value::as_str)
            .unwrap_or("image-*");
        let query = serde_json::Value::Object(
            descriptor
                .properties
                .iter()
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect(),
        );
        let mut image_id = digest(&query.to_string());
        image_id.truncate(17);
        Attributes::from([
            (String::from("id"), format!("ami-{image_id}")),
            (String::from("name"), pattern.replace('*', "dry-run")),
        ])
    }

    fn fabricate(&self, step: &Step) -> Result<Attributes, DryRunError> {
        let resolved = &step.resolved;
        let name = resolved.name.as_str();
        let id = format!("{name}-{}", Self::suffix());
        let attributes = match resolved.kind {
            ResourceKind::StorageBucket => Attributes::from([
                (String::from("arn"), format!("arn:aws:s3:::{id}")),
                (String::from("bucket"), id),
            ]),
            ResourceKind::KeyPair => Attributes::from([(String::from("key_name"), id)]),
            ResourceKind::IamRole => Attributes::from([
                (
                    String::from("arn"),
                    format!("arn:aws:iam::{DRY_RUN_ACCOUNT}:role/{id}"),
                ),
                (String::from("name"), id),
            ]),
            ResourceKind::InstanceProfile => Attributes::from([
                (
                    String::from("arn"),
                    format!("arn:aws:iam::{DRY_RUN_ACCOUNT}:instance-profile/{id}"),
                ),
                (String::from("id"), id),
            ]),
            ResourceKind::SecurityGroup => Attributes::from([
                (String::from("id"), format!("sg-{}", Self::suffix())),
                (String::from("name"), id),
            ]),
            ResourceKind::ComputeInstance => {
                let user_data = resolved.str_property("user_data").ok_or_else(|| {
                    DryRunError::MissingProperty {
                        resource: resolved.name.clone(),
                        property: String::from("user_data"),
                    }
                })?;
                let address = self.next_address();
                Attributes::from([
                    (String::from("id"), format!("i-{}", Self::suffix())),
                    (
                        String::from("public_dns"),
                        format!(
                            "ec2-{}.compute-1.amazonaws.com",
                            address.replace('.', "-")
                        ),
                    ),
                    (String::from("public_ip"), address),
                    (String::from("user_data"), user_data.to_owned()),
                ])
            }
            ResourceKind::HttpApi => Attributes::from([(
                String::from("url"),
                format!(
                    "https://{}.execute-api.us-east-1.amazonaws.com/stage/",
                    Self::suffix()
                ),
            )]),
            ResourceKind::MachineImage | ResourceKind::BootstrapScript => {
                return Err(DryRunError::Unsupported {
                    resource: resolved.name.clone(),
                    kind: resolved.kind,
                });
            }
        };
        Ok(attributes)
    }

    fn update(&self, step: &Step) -> Result<Attributes, DryRunError> {
        let fresh = self.fabricate(step)?;
        let Some(prior) = &step.prior else {
            return Ok(fresh);
        };
        // In-place updates keep provider identity; only property echoes move.
        let mut attributes = prior.attributes.clone();
        if let Some(user_data) = fresh.get("user_data") {
            attributes.insert(String::from("user_data"), user_data.clone());
        }
        Ok(attributes)
    }
}

impl Engine for DryRunEngine {
    type Error = DryRunError;

    fn lookup<'a>(
        &'a self,
        descriptor: &'a ResolvedDescriptor,
    ) -> EngineFuture<'a, Attributes, Self::Error> {
        Box::pin(async move {
            if descriptor.kind.materialization() != Materialization::Lookup {
                return Err(DryRunError::Unsupported {
                    resource: descriptor.name.clone(),
                    kind: descriptor.kind,
                });
            }
            Ok(Self::image(descriptor))
        })
    }

    fn materialize<'a>(&'a self, step: &'a Step) -> EngineFuture<'a, Attributes, Self::Error> {
        Box::pin(async move {
            match step.action {
                PlanAction::Update => self.update(step),
                PlanAction::Create | PlanAction::Replace | PlanAction::Unchanged => {
                    self.fabricate(step)
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::engine::AppliedResource;
    use serde_json::json;

    fn instance_step(action: PlanAction, prior: Option<AppliedResource>) -> Step {
        Step {
            resolved: ResolvedDescriptor {
                name: LogicalName::from("server-instance"),
                kind: ResourceKind::ComputeInstance,
                properties: BTreeMap::from([(
                    String::from("user_data"),
                    json!("#!/bin/bash\n"),
                )]),
            },
            action,
            prior,
        }
    }

    #[tokio::test]
    async fn instances_receive_documentation_addresses() {
        let engine = DryRunEngine::new();
        let first = engine
            .materialize(&instance_step(PlanAction::Create, None))
            .await
            .expect("create");
        let second = engine
            .materialize(&instance_step(PlanAction::Create, None))
            .await
            .expect("create");

        assert_eq!(first.get("public_ip").map(String::as_str), Some("192.0.2.10"));
        assert_eq!(second.get("public_ip").map(String::as_str), Some("192.0.2.11"));
        assert_eq!(
            first.get("user_data").map(String::as_str),
            Some("#!/bin/bash\n")
        );
    }

    #[tokio::test]
    async fn updates_keep_prior_identity() {
        let engine = DryRunEngine::new();
        let prior = AppliedResource {
            kind: ResourceKind::ComputeInstance,
            properties: BTreeMap::new(),
            attributes: Attributes::from([
                (String::from("id"), String::from("i-existing")),
                (String::from("public_ip"), String::from("192.0.2.99")),
            ]),
        };
        let attributes = engine
            .materialize(&instance_step(PlanAction::Update, Some(prior)))
            .await
            .expect("update");

        assert_eq!(attributes.get("id").map(String::as_str), Some("i-existing"));
        assert_eq!(
            attributes.get("public_ip").map(String::as_str),
            Some("192.0.2.99")
        );
    }

    #[tokio::test]
    async fn lookups_only_accept_lookup_kinds() {
        let engine = DryRunEngine::new();
        let step = instance_step(PlanAction::Create, None);
        let err = engine.lookup(&step.resolved).await.expect_err("not a lookup");
        assert!(matches!(err, DryRunError::Unsupported { .. }));
    }

    #[tokio::test]
    async fn image_names_follow_the_filter_pattern() {
        let engine = DryRunEngine::new();
        let descriptor = ResolvedDescriptor {
            name: LogicalName::from("server-ami"),
            kind: ResourceKind::MachineImage,
            properties: BTreeMap::from([(
                String::from("filters"),
                json!([{ "name": "name", "values": ["amzn-ami-hvm-*"] }]),
            )]),
        };
        let attributes = engine.lookup(&descriptor).await.expect("lookup");
        assert_eq!(
            attributes.get("name").map(String::as_str),
            Some("amzn-ami-hvm-dry-run")
        );
        assert!(attributes.get("id").is_some_and(|id| id.starts_with("ami-")));

        let again = engine.lookup(&descriptor).await.expect("lookup");
        assert_eq!(again, attributes);
    }
}
