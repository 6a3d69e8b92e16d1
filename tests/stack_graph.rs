//! Tests for the declared stack graph: edges, ordering, and the audit that
//! catches a dropped dependency.

use std::collections::BTreeSet;

use blockhost::control_panel::ControlPanel;
use blockhost::graph::{GraphError, ResourceGraph};
use blockhost::resources::{
    self, ACCESS_ROLE, BOOTSTRAP_SCRIPT, CONTROL_PANEL_API, INSTANCE_PROFILE, MACHINE_IMAGE,
    REQUIRED_EDGES, SECURITY_GROUP, SERVER_INSTANCE, SSH_KEY, STORAGE_BUCKET,
};
use blockhost::test_support::SAMPLE_SSH_PUBLIC_KEY;
use blockhost::{
    FileRecord, FileTree, LogicalName, ResourceDescriptor, Stack, StackConfig, StackError,
};
use rstest::*;

#[fixture]
fn config() -> StackConfig {
    StackConfig {
        root_dir: String::from("."),
        source_dir: String::from("server-code"),
        install_root: String::from("/opt"),
        bucket_env_var: String::from("MC_BUCKET"),
        instance_type: String::from("t3.medium"),
        image_owner: String::from("137112412989"),
        image_name_pattern: String::from("amzn-ami-hvm-*"),
        ssh_public_key: Some(String::from(SAMPLE_SSH_PUBLIC_KEY)),
        halt_on_step_failure: false,
    }
}

#[fixture]
fn files() -> FileTree {
    [FileRecord::new("server-code/restore.sh", "echo restore\n")]
        .into_iter()
        .collect()
}

fn declared(config: &StackConfig, files: &FileTree) -> Vec<ResourceDescriptor> {
    let panel = ControlPanel::new(resources::server_public_ip());
    resources::declare(config, files, &panel)
}

fn name(value: &str) -> LogicalName {
    LogicalName::from(value)
}

#[rstest]
fn stack_declares_every_required_edge(config: StackConfig, files: FileTree) {
    let stack = Stack::define(&config, &files).expect("stack defines");
    let graph = stack.graph();

    assert_eq!(graph.len(), 9);
    for (dependent, dependency) in REQUIRED_EDGES {
        assert!(
            graph.dependencies_of(&name(dependent)).contains(&name(dependency)),
            "{dependent} should depend on {dependency}"
        );
    }
}

#[rstest]
fn instance_is_the_fan_in_point(config: StackConfig, files: FileTree) {
    let stack = Stack::define(&config, &files).expect("stack defines");
    let dependencies = stack.graph().dependencies_of(&name(SERVER_INSTANCE));

    let expected = [
        INSTANCE_PROFILE,
        SECURITY_GROUP,
        SSH_KEY,
        MACHINE_IMAGE,
        BOOTSTRAP_SCRIPT,
    ];
    assert_eq!(dependencies.len(), expected.len());
    for dependency in expected {
        assert!(dependencies.contains(&name(dependency)), "missing {dependency}");
    }
    assert_eq!(
        stack.graph().dependents_of(&name(SERVER_INSTANCE)),
        BTreeSet::from([name(CONTROL_PANEL_API)])
    );
}

#[rstest]
fn creation_order_respects_every_edge(config: StackConfig, files: FileTree) {
    let stack = Stack::define(&config, &files).expect("stack defines");
    let order = stack.graph().creation_order();
    let position = |value: &str| {
        order
            .iter()
            .position(|entry| entry.as_str() == value)
            .unwrap_or_else(|| panic!("{value} missing from creation order"))
    };

    for (dependent, dependency) in REQUIRED_EDGES {
        assert!(
            position(dependency) < position(dependent),
            "{dependency} must precede {dependent}"
        );
    }
    assert_eq!(order.first().map(LogicalName::as_str), Some(STORAGE_BUCKET));
    assert_eq!(order.last().map(LogicalName::as_str), Some(CONTROL_PANEL_API));
}

#[rstest]
fn waves_group_independent_resources(config: StackConfig, files: FileTree) {
    let stack = Stack::define(&config, &files).expect("stack defines");
    let waves = stack.graph().waves();

    let first: Vec<&str> = waves
        .first()
        .map(|wave| wave.iter().map(LogicalName::as_str).collect())
        .unwrap_or_default();
    assert_eq!(
        first,
        vec![STORAGE_BUCKET, SECURITY_GROUP, MACHINE_IMAGE, SSH_KEY]
    );
    let second: Vec<&str> = waves
        .get(1)
        .map(|wave| wave.iter().map(LogicalName::as_str).collect())
        .unwrap_or_default();
    assert_eq!(second, vec![ACCESS_ROLE, BOOTSTRAP_SCRIPT]);
}

/// Dropping any one instance prerequisite leaves a graph that still builds
/// but fails the audit, naming the lost edge.
#[rstest]
#[case::profile("iam_instance_profile", INSTANCE_PROFILE)]
#[case::security_group("security_groups", SECURITY_GROUP)]
#[case::ssh_key("key_name", SSH_KEY)]
#[case::image("ami", MACHINE_IMAGE)]
#[case::bootstrap("user_data", BOOTSTRAP_SCRIPT)]
fn audit_detects_a_dropped_instance_dependency(
    config: StackConfig,
    files: FileTree,
    #[case] property: &str,
    #[case] dependency: &str,
) {
    let descriptors = declared(&config, &files)
        .into_iter()
        .map(|mut descriptor| {
            if descriptor.name().as_str() == SERVER_INSTANCE {
                descriptor.remove_property(property);
            }
            descriptor
        });
    let graph = ResourceGraph::from_descriptors(descriptors).expect("graph still builds");

    assert_eq!(
        graph.audit(&REQUIRED_EDGES),
        Err(GraphError::MissingEdge {
            dependent: name(SERVER_INSTANCE),
            dependency: name(dependency),
        })
    );
}

#[rstest]
fn invalid_configuration_fails_definition(config: StackConfig, files: FileTree) {
    let cfg = StackConfig {
        ssh_public_key: None,
        ..config
    };

    let err = Stack::define(&cfg, &files).expect_err("key is required");
    assert!(matches!(err, StackError::Config(_)), "unexpected error: {err}");
}
