//! Resource descriptors: declared, not-yet-materialized resources.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::output::{AttributeStore, Output, ResolveError};
use crate::types::LogicalName;

/// Kind of cloud resource a descriptor declares.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// Object storage bucket for world data.
    StorageBucket,
    /// Machine image resolved by a filter query.
    MachineImage,
    /// Imported SSH public key.
    KeyPair,
    /// Permission role assumed by the instance.
    IamRole,
    /// Instance profile wrapping the role.
    InstanceProfile,
    /// Network ingress/egress rule set.
    SecurityGroup,
    /// Synthesized launch script.
    BootstrapScript,
    /// Compute instance running the server.
    ComputeInstance,
    /// HTTP control-panel façade.
    HttpApi,
}

/// How a descriptor becomes concrete.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Materialization {
    /// Created, updated, or replaced by the engine.
    Managed,
    /// Read-only lookup, re-resolved on every pass.
    Lookup,
    /// Computed locally from resolved inputs.
    Computed,
}

impl ResourceKind {
    /// Materialization class of this kind.
    #[must_use]
    pub const fn materialization(self) -> Materialization {
        match self {
            Self::MachineImage => Materialization::Lookup,
            Self::BootstrapScript => Materialization::Computed,
            Self::StorageBucket
            | Self::KeyPair
            | Self::IamRole
            | Self::InstanceProfile
            | Self::SecurityGroup
            | Self::ComputeInstance
            | Self::HttpApi => Materialization::Managed,
        }
    }

    /// Provider-facing type label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::StorageBucket => "aws:s3:Bucket",
            Self::MachineImage => "aws:ec2:getAmi",
            Self::KeyPair => "aws:ec2:KeyPair",
            Self::IamRole => "aws:iam:Role",
            Self::InstanceProfile => "aws:iam:InstanceProfile",
            Self::SecurityGroup => "aws:ec2:SecurityGroup",
            Self::BootstrapScript => "blockhost:BootstrapScript",
            Self::ComputeInstance => "aws:ec2:Instance",
            Self::HttpApi => "awsx:apigateway:API",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declared resource with deferred properties.
///
/// The dependency set is everything named via [`depends_on`](Self::depends_on)
/// plus every resource a property output reads from.
#[derive(Clone, Debug)]
pub struct ResourceDescriptor {
    name: LogicalName,
    kind: ResourceKind,
    properties: BTreeMap<String, Output<Value>>,
    depends_on: BTreeSet<LogicalName>,
    replace_on_changes: BTreeSet<String>,
}

impl ResourceDescriptor {
    /// Starts a descriptor with no properties.
    #[must_use]
    pub fn new(name: impl Into<LogicalName>, kind: ResourceKind) -> Self {
        Self {
            name: name.into(),
            kind,
            properties: BTreeMap::new(),
            depends_on: BTreeSet::new(),
            replace_on_changes: BTreeSet::new(),
        }
    }

    /// Sets a deferred property.
    #[must_use]
    pub fn property(mut self, key: impl Into<String>, value: Output<Value>) -> Self {
        self.properties.insert(key.into(), value);
        self
    }

    /// Sets a property whose value is already known.
    #[must_use]
    pub fn literal(self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.property(key, Output::known(value.into()))
    }

    /// Adds an explicit dependency not expressed through a property.
    #[must_use]
    pub fn depends_on(mut self, name: impl Into<LogicalName>) -> Self {
        self.depends_on.insert(name.into());
        self
    }

    /// Marks a property whose change forces replacement.
    #[must_use]
    pub fn replace_on_change(mut self, key: impl Into<String>) -> Self {
        self.replace_on_changes.insert(key.into());
        self
    }

    /// Removes a property, returning it.
    pub fn remove_property(&mut self, key: &str) -> Option<Output<Value>> {
        self.properties.remove(key)
    }

    /// Logical name.
    #[must_use]
    pub const fn name(&self) -> &LogicalName {
        &self.name
    }

    /// Resource kind.
    #[must_use]
    pub const fn kind(&self) -> ResourceKind {
        self.kind
    }

    /// Declared properties by name.
    #[must_use]
    pub const fn properties(&self) -> &BTreeMap<String, Output<Value>> {
        &self.properties
    }

    /// Properties whose change forces replacement.
    #[must_use]
    pub const fn replace_on_changes(&self) -> &BTreeSet<String> {
        &self.replace_on_changes
    }

    /// Every resource this descriptor must wait for.
    #[must_use]
    pub fn dependencies(&self) -> BTreeSet<LogicalName> {
        let mut dependencies = self.depends_on.clone();
        for output in self.properties.values() {
            dependencies.extend(output.resources());
        }
        dependencies.remove(&self.name);
        dependencies
    }

    /// Resolves every property against `store`.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError`] when a referenced attribute is not yet in
    /// `store`.
    pub fn resolve(&self, store: &AttributeStore) -> Result<ResolvedDescriptor, ResolveError> {
        let properties = self
            .properties
            .iter()
            .map(|(key, output)| Ok((key.clone(), output.resolve(store)?)))
            .collect::<Result<BTreeMap<_, _>, ResolveError>>()?;
        Ok(ResolvedDescriptor {
            name: self.name.clone(),
            kind: self.kind,
            properties,
        })
    }
}

/// Descriptor with every property concrete, ready for the engine.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResolvedDescriptor {
    /// Logical name.
    pub name: LogicalName,
    /// Resource kind.
    pub kind: ResourceKind,
    /// Concrete properties.
    pub properties: BTreeMap<String, Value>,
}

impl ResolvedDescriptor {
    /// String property `key`, if present and a string.
    #[must_use]
    pub fn str_property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).and_then(Value::as_str)
    }
}
