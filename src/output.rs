//! Deferred values that resolve once their owning resources exist.
//!
//! An [`Output`] records which resource attributes it reads and how to turn
//! them into a value. Nothing can observe the value until the provisioner has
//! stored every referenced attribute in an [`AttributeStore`]; the dependency
//! set doubles as the source of graph edges for the descriptors that embed
//! the output.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::LogicalName;

/// Attributes reported for one materialized resource.
pub type Attributes = BTreeMap<String, String>;

/// Reference to a single attribute of a resource.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct AttributeRef {
    /// Resource owning the attribute.
    pub resource: LogicalName,
    /// Attribute name (for example `public_ip`).
    pub attribute: String,
}

impl AttributeRef {
    /// Creates a reference to `resource.attribute`.
    #[must_use]
    pub fn new(resource: impl Into<LogicalName>, attribute: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            attribute: attribute.into(),
        }
    }
}

impl fmt::Display for AttributeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.resource, self.attribute)
    }
}

/// Errors raised while resolving deferred values.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ResolveError {
    /// Raised when an attribute is read before its resource materialized.
    #[error("attribute `{attribute}` of `{resource}` has not been resolved")]
    Unresolved {
        /// Resource that owns the attribute.
        resource: LogicalName,
        /// Missing attribute.
        attribute: String,
    },
}

/// Resolved attributes keyed by resource.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct AttributeStore {
    values: BTreeMap<LogicalName, Attributes>,
}

impl AttributeStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the attributes of a materialized resource, replacing any
    /// earlier entry.
    pub fn insert(&mut self, resource: LogicalName, attributes: Attributes) {
        self.values.insert(resource, attributes);
    }

    /// Looks up one attribute.
    #[must_use]
    pub fn get(&self, reference: &AttributeRef) -> Option<&str> {
        self.values
            .get(&reference.resource)
            .and_then(|attributes| attributes.get(&reference.attribute))
            .map(String::as_str)
    }

    /// All attributes of `resource`, if it has materialized.
    #[must_use]
    pub fn attributes_of(&self, resource: &LogicalName) -> Option<&Attributes> {
        self.values.get(resource)
    }
}

type Resolver<T> = Arc<dyn Fn(&AttributeStore) -> Result<T, ResolveError> + Send + Sync>;

/// Deferred value of type `T`.
pub struct Output<T> {
    dependencies: BTreeSet<AttributeRef>,
    resolver: Resolver<T>,
}

impl<T> Clone for Output<T> {
    fn clone(&self) -> Self {
        Self {
            dependencies: self.dependencies.clone(),
            resolver: Arc::clone(&self.resolver),
        }
    }
}

impl<T> fmt::Debug for Output<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Output")
            .field("dependencies", &self.dependencies)
            .finish_non_exhaustive()
    }
}

impl Output<String> {
    /// Output reading `resource.attribute` once it resolves.
    #[must_use]
    pub fn attribute(resource: &LogicalName, attribute: &str) -> Self {
        let reference = AttributeRef::new(resource.clone(), attribute);
        let lookup = reference.clone();
        Self {
            dependencies: BTreeSet::from([reference]),
            resolver: Arc::new(move |store| {
                store
                    .get(&lookup)
                    .map(str::to_owned)
                    .ok_or_else(|| ResolveError::Unresolved {
                        resource: lookup.resource.clone(),
                        attribute: lookup.attribute.clone(),
                    })
            }),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Output<T> {
    /// Output whose value is already known.
    #[must_use]
    pub fn known(value: T) -> Self {
        Self {
            dependencies: BTreeSet::new(),
            resolver: Arc::new(move |_| Ok(value.clone())),
        }
    }
}

impl<T: 'static> Output<T> {
    /// Applies `transform` to the value once it resolves.
    #[must_use]
    pub fn map<U, F>(&self, transform: F) -> Output<U>
    where
        U: 'static,
        F: Fn(T) -> U + Send + Sync + 'static,
    {
        let inner = Arc::clone(&self.resolver);
        Output {
            dependencies: self.dependencies.clone(),
            resolver: Arc::new(move |store| inner(store).map(&transform)),
        }
    }

    /// Combines two outputs into one that resolves when both do.
    #[must_use]
    pub fn zip<U: 'static>(&self, other: &Output<U>) -> Output<(T, U)> {
        let left = Arc::clone(&self.resolver);
        let right = Arc::clone(&other.resolver);
        let mut dependencies = self.dependencies.clone();
        dependencies.extend(other.dependencies.iter().cloned());
        Output {
            dependencies,
            resolver: Arc::new(move |store| Ok((left(store)?, right(store)?))),
        }
    }

    /// Attribute references this output reads.
    #[must_use]
    pub const fn dependencies(&self) -> &BTreeSet<AttributeRef> {
        &self.dependencies
    }

    /// Resources this output reads from.
    #[must_use]
    pub fn resources(&self) -> BTreeSet<LogicalName> {
        self.dependencies
            .iter()
            .map(|reference| reference.resource.clone())
            .collect()
    }

    /// Whether the value needs no resource to resolve.
    #[must_use]
    pub fn is_known(&self) -> bool {
        self.dependencies.is_empty()
    }

    /// Computes the value from resolved attributes.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError::Unresolved`] when a referenced attribute is
    /// missing from `store`.
    pub fn resolve(&self, store: &AttributeStore) -> Result<T, ResolveError> {
        (self.resolver)(store)
    }
}

impl<T: 'static> Output<Vec<T>> {
    /// Collects many outputs into one list output.
    #[must_use]
    pub fn all(outputs: Vec<Output<T>>) -> Self {
        let dependencies = outputs
            .iter()
            .flat_map(|output| output.dependencies.iter().cloned())
            .collect();
        let resolvers: Vec<Resolver<T>> = outputs
            .into_iter()
            .map(|output| output.resolver)
            .collect();
        Self {
            dependencies,
            resolver: Arc::new(move |store| {
                resolvers.iter().map(|resolver| resolver(store)).collect()
            }),
        }
    }
}
