//! Core library for the blockhost game-server stack.
//!
//! The crate declares the cloud resources behind a single-node game server
//! as a dependency graph of deferred values, renders the instance bootstrap
//! script from a payload directory, and drives a pluggable engine through
//! the graph in dependency order.

pub mod bootstrap;
pub mod config;
pub mod control_panel;
pub mod engine;
pub mod file_tree;
pub mod graph;
pub mod output;
pub mod provision;
pub mod resources;
pub mod stack;
pub mod test_support;
pub mod types;

pub use bootstrap::{
    BootstrapOptions, BootstrapScript, BootstrapSynthesizer, digest, synthesize,
};
pub use config::{ConfigError, StackConfig};
pub use control_panel::{BoundControlPanel, ControlPanel, PanelRequest, PanelResponse};
pub use engine::{
    AppliedResource, AppliedState, DryRunEngine, DryRunError, Engine, EngineFuture, PlanAction,
    Step, plan_action,
};
pub use file_tree::{FileRecord, FileTree, FileTreeCollector, FileTreeError, collect_file_tree};
pub use graph::{GraphError, ResourceDescriptor, ResourceGraph, ResourceKind};
pub use output::{AttributeRef, AttributeStore, Output, ResolveError};
pub use provision::{ProvisionError, ProvisionReport, Provisioner};
pub use stack::{ResolvedOutputs, Stack, StackError, StackOutputs};
pub use types::LogicalName;
