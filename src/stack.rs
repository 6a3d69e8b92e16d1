//! The game-server stack: declared resources, the control panel, and the
//! published outputs.

use serde::Serialize;
use thiserror::Error;
use tracing::info;

use crate::config::{ConfigError, StackConfig};
use crate::control_panel::ControlPanel;
use crate::file_tree::FileTree;
use crate::graph::{GraphError, ResourceGraph};
use crate::output::{AttributeStore, Output, ResolveError};
use crate::resources::{self, REQUIRED_EDGES};
use crate::types::LogicalName;

/// Errors raised while defining the stack.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum StackError {
    /// Raised when the configuration fails validation.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// Raised when the declared resources do not form a complete DAG.
    #[error("invalid resource graph: {0}")]
    Graph(#[from] GraphError),
}

/// Deferred stack outputs.
#[derive(Clone, Debug)]
pub struct StackOutputs {
    /// Storage bucket name.
    pub bucket_name: Output<String>,
    /// Compute instance identifier.
    pub instance_id: Output<String>,
    /// Instance public address.
    pub public_ip: Output<String>,
    /// Instance public hostname.
    pub hostname: Output<String>,
    /// Rendered bootstrap script as launched.
    pub user_data: Output<String>,
    /// Control-panel base URL.
    pub api_url: Output<String>,
}

impl StackOutputs {
    fn declare() -> Self {
        let instance_name = LogicalName::from(resources::SERVER_INSTANCE);
        let instance = |attribute: &str| Output::attribute(&instance_name, attribute);
        Self {
            bucket_name: resources::bucket_name(),
            instance_id: instance("id"),
            public_ip: resources::server_public_ip(),
            hostname: instance("public_dns"),
            user_data: instance("user_data"),
            api_url: Output::attribute(&LogicalName::from(resources::CONTROL_PANEL_API), "url"),
        }
    }

    /// Resolves every output.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError`] when a referenced resource has not
    /// materialized.
    pub fn resolve(&self, store: &AttributeStore) -> Result<ResolvedOutputs, ResolveError> {
        Ok(ResolvedOutputs {
            bucket_name: self.bucket_name.resolve(store)?,
            instance_id: self.instance_id.resolve(store)?,
            public_ip: self.public_ip.resolve(store)?,
            hostname: self.hostname.resolve(store)?,
            user_data: self.user_data.resolve(store)?,
            api_url: self.api_url.resolve(store)?,
        })
    }
}

/// Published stack outputs.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct ResolvedOutputs {
    /// Storage bucket name.
    #[serde(rename = "bucketName")]
    pub bucket_name: String,
    /// Compute instance identifier.
    #[serde(rename = "serverInstance")]
    pub instance_id: String,
    /// Instance public address.
    #[serde(rename = "publicIp")]
    pub public_ip: String,
    /// Instance public hostname.
    pub hostname: String,
    /// Rendered bootstrap script as launched.
    #[serde(rename = "userData")]
    pub user_data: String,
    /// Control-panel base URL.
    #[serde(rename = "apiUrl")]
    pub api_url: String,
}

impl ResolvedOutputs {
    /// Outputs as `(published key, value)` pairs in publication order.
    #[must_use]
    pub fn entries(&self) -> [(&'static str, &str); 6] {
        [
            ("bucketName", self.bucket_name.as_str()),
            ("serverInstance", self.instance_id.as_str()),
            ("publicIp", self.public_ip.as_str()),
            ("hostname", self.hostname.as_str()),
            ("userData", self.user_data.as_str()),
            ("apiUrl", self.api_url.as_str()),
        ]
    }
}

/// Fully declared and validated stack.
#[derive(Clone, Debug)]
pub struct Stack {
    graph: ResourceGraph,
    control_panel: ControlPanel,
    outputs: StackOutputs,
}

impl Stack {
    /// Declares every resource, validates the graph, and audits the required
    /// edges.
    ///
    /// # Errors
    ///
    /// Returns [`StackError::Config`] when `config` fails validation and
    /// [`StackError::Graph`] when the declarations do not form a complete
    /// DAG.
    pub fn define(config: &StackConfig, files: &FileTree) -> Result<Self, StackError> {
        config.validate()?;
        let control_panel = ControlPanel::new(resources::server_public_ip());
        let graph = ResourceGraph::from_descriptors(resources::declare(
            config,
            files,
            &control_panel,
        ))?;
        graph.audit(&REQUIRED_EDGES)?;
        info!(
            resources = graph.len(),
            payload_files = files.len(),
            "stack defined"
        );
        Ok(Self {
            graph,
            control_panel,
            outputs: StackOutputs::declare(),
        })
    }

    /// Validated resource graph.
    #[must_use]
    pub const fn graph(&self) -> &ResourceGraph {
        &self.graph
    }

    /// Control panel served by the HTTP façade.
    #[must_use]
    pub const fn control_panel(&self) -> &ControlPanel {
        &self.control_panel
    }

    /// Deferred outputs.
    #[must_use]
    pub const fn outputs(&self) -> &StackOutputs {
        &self.outputs
    }
}
