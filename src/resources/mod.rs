//! Declarations for every resource in the game-server stack.
//!
//! Each constructor returns a [`ResourceDescriptor`] whose deferred
//! properties read the attributes of the resources it depends on; the graph
//! derives its edges from those reads. [`REQUIRED_EDGES`] restates the edges
//! the stack cannot run without so a declaration that drops one is caught.

use std::sync::Arc;

use serde_json::{Value, json};

use crate::bootstrap::BootstrapSynthesizer;
use crate::config::StackConfig;
use crate::control_panel::ControlPanel;
use crate::file_tree::FileTree;
use crate::graph::{ResourceDescriptor, ResourceKind};
use crate::output::Output;
use crate::types::LogicalName;

/// Object storage bucket holding world data.
pub const STORAGE_BUCKET: &str = "main-storage";
/// Machine image lookup.
pub const MACHINE_IMAGE: &str = "server-ami";
/// Imported SSH public key.
pub const SSH_KEY: &str = "server-ssh-key";
/// Role granting the instance access to the bucket.
pub const ACCESS_ROLE: &str = "access-s3-role";
/// Instance profile wrapping the role.
pub const INSTANCE_PROFILE: &str = "server-access-s3";
/// Network rule set.
pub const SECURITY_GROUP: &str = "mc-server-group";
/// Synthesized bootstrap script.
pub const BOOTSTRAP_SCRIPT: &str = "server-bootstrap";
/// Compute instance running the server.
pub const SERVER_INSTANCE: &str = "server-instance";
/// HTTP control-panel façade.
pub const CONTROL_PANEL_API: &str = "mc-api";

/// Edges that must be declared, as `(dependent, dependency)`.
pub const REQUIRED_EDGES: [(&str, &str); 9] = [
    (SERVER_INSTANCE, INSTANCE_PROFILE),
    (SERVER_INSTANCE, SECURITY_GROUP),
    (SERVER_INSTANCE, SSH_KEY),
    (SERVER_INSTANCE, MACHINE_IMAGE),
    (SERVER_INSTANCE, BOOTSTRAP_SCRIPT),
    (ACCESS_ROLE, STORAGE_BUCKET),
    (INSTANCE_PROFILE, ACCESS_ROLE),
    (BOOTSTRAP_SCRIPT, STORAGE_BUCKET),
    (CONTROL_PANEL_API, SERVER_INSTANCE),
];

/// Instance properties whose change forces a new instance. Launch data is
/// only applied at creation, so `user_data` must be among them.
pub const INSTANCE_REPLACE_ON_CHANGES: [&str; 4] =
    ["ami", "user_data", "key_name", "security_groups"];

const ANY_IPV4: &str = "0.0.0.0/0";

/// Ingress rules as `(protocol, from_port, to_port)`.
const INGRESS_RULES: [(&str, u16, u16); 6] = [
    ("icmp", 0, 0),
    ("tcp", 22, 22),
    ("tcp", 80, 80),
    ("tcp", 3389, 3389),
    ("tcp", 25565, 25565),
    ("udp", 25565, 25565),
];

/// Object actions granted on the bucket.
pub const BUCKET_ACTIONS: [&str; 3] = ["s3:GetObject", "s3:PutObject", "s3:ListBucket"];

fn attribute(resource: &str, attribute: &str) -> Output<String> {
    Output::attribute(&LogicalName::from(resource), attribute)
}

/// Deferred bucket name.
#[must_use]
pub fn bucket_name() -> Output<String> {
    attribute(STORAGE_BUCKET, "bucket")
}

/// Storage bucket; no dependencies.
#[must_use]
pub fn storage_bucket() -> ResourceDescriptor {
    ResourceDescriptor::new(STORAGE_BUCKET, ResourceKind::StorageBucket)
}

/// Most recent image owned by `owner` whose name matches `name_pattern`.
#[must_use]
pub fn machine_image(owner: &str, name_pattern: &str) -> ResourceDescriptor {
    ResourceDescriptor::new(MACHINE_IMAGE, ResourceKind::MachineImage)
        .literal("owners", json!([owner]))
        .literal("filters", json!([{ "name": "name", "values": [name_pattern] }]))
        .literal("most_recent", true)
}

/// SSH public key import.
#[must_use]
pub fn ssh_key(public_key: &str) -> ResourceDescriptor {
    ResourceDescriptor::new(SSH_KEY, ResourceKind::KeyPair).literal("public_key", public_key.trim())
}

/// Trust policy letting compute instances assume the role.
#[must_use]
pub fn ec2_trust_policy() -> Value {
    json!({
        "Version": "2012-10-17",
        "Statement": [{
            "Effect": "Allow",
            "Principal": { "Service": "ec2.amazonaws.com" },
            "Action": "sts:AssumeRole",
        }],
    })
}

/// Least-privilege object access scoped to `bucket` and its contents.
#[must_use]
pub fn bucket_access_policy(bucket: &str) -> Value {
    json!({
        "Version": "2012-10-17",
        "Statement": [{
            "Effect": "Allow",
            "Action": BUCKET_ACTIONS,
            "Resource": [
                format!("arn:aws:s3:::{bucket}"),
                format!("arn:aws:s3:::{bucket}/*"),
            ],
        }],
    })
}

/// Role assumed by the instance. Its inline policy is deferred on the bucket
/// name.
#[must_use]
pub fn access_role() -> ResourceDescriptor {
    ResourceDescriptor::new(ACCESS_ROLE, ResourceKind::IamRole)
        .literal("assume_role_policy", ec2_trust_policy())
        .property(
            "inline_policy",
            bucket_name().map(|bucket| bucket_access_policy(&bucket)),
        )
        .literal("path", "/")
}

/// Instance profile wrapping [`access_role`].
#[must_use]
pub fn instance_profile() -> ResourceDescriptor {
    ResourceDescriptor::new(INSTANCE_PROFILE, ResourceKind::InstanceProfile)
        .property("role", attribute(ACCESS_ROLE, "name").map(Value::from))
}

fn rule(protocol: &str, from_port: u16, to_port: u16) -> Value {
    json!({
        "protocol": protocol,
        "from_port": from_port,
        "to_port": to_port,
        "cidr_blocks": [ANY_IPV4],
    })
}

/// Network rule set: the ingress allow-list and allow-all egress.
#[must_use]
pub fn security_group() -> ResourceDescriptor {
    let ingress: Vec<Value> = INGRESS_RULES
        .iter()
        .map(|&(protocol, from_port, to_port)| rule(protocol, from_port, to_port))
        .collect();
    ResourceDescriptor::new(SECURITY_GROUP, ResourceKind::SecurityGroup)
        .literal("ingress", ingress)
        .literal("egress", json!([rule("-1", 0, 0)]))
}

/// Bootstrap script computed from the bucket name and the payload tree.
#[must_use]
pub fn bootstrap_script(synthesizer: BootstrapSynthesizer, files: FileTree) -> ResourceDescriptor {
    let payload = Arc::new(files);
    let content = bucket_name().map(move |bucket| {
        Value::from(synthesizer.synthesize(&bucket, &payload).into_string())
    });
    ResourceDescriptor::new(BOOTSTRAP_SCRIPT, ResourceKind::BootstrapScript)
        .property("content", content)
}

/// Compute instance; the fan-in point of the graph.
#[must_use]
pub fn server_instance(instance_type: &str) -> ResourceDescriptor {
    let security_groups = Output::all(vec![attribute(SECURITY_GROUP, "name")]).map(Value::from);
    let descriptor = ResourceDescriptor::new(SERVER_INSTANCE, ResourceKind::ComputeInstance)
        .literal("instance_type", instance_type)
        .property("ami", attribute(MACHINE_IMAGE, "id").map(Value::from))
        .property("key_name", attribute(SSH_KEY, "key_name").map(Value::from))
        .property("security_groups", security_groups)
        .property(
            "iam_instance_profile",
            attribute(INSTANCE_PROFILE, "id").map(Value::from),
        )
        .property(
            "user_data",
            attribute(BOOTSTRAP_SCRIPT, "content").map(Value::from),
        );
    INSTANCE_REPLACE_ON_CHANGES
        .iter()
        .fold(descriptor, |descriptor, key| descriptor.replace_on_change(*key))
}

/// Deferred public address of the instance.
#[must_use]
pub fn server_public_ip() -> Output<String> {
    attribute(SERVER_INSTANCE, "public_ip")
}

/// HTTP façade declaring the panel's routes over the instance address.
#[must_use]
pub fn control_panel_api(panel: &ControlPanel) -> ResourceDescriptor {
    ResourceDescriptor::new(CONTROL_PANEL_API, ResourceKind::HttpApi)
        .literal("routes", panel.route_table())
        .property(
            "server_address",
            panel.server_address().map(Value::from),
        )
}

/// Declares every resource of the stack.
#[must_use]
pub fn declare(
    config: &StackConfig,
    files: &FileTree,
    panel: &ControlPanel,
) -> Vec<ResourceDescriptor> {
    vec![
        storage_bucket(),
        machine_image(&config.image_owner, &config.image_name_pattern),
        ssh_key(config.public_key()),
        access_role(),
        instance_profile(),
        security_group(),
        bootstrap_script(
            BootstrapSynthesizer::new(config.bootstrap_options()),
            files.clone(),
        ),
        server_instance(&config.instance_type),
        control_panel_api(panel),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    use crate::output::AttributeStore;

    fn store(entries: &[(&str, &str, &str)]) -> AttributeStore {
        let mut store = AttributeStore::new();
        for (resource, key, value) in entries {
            let mut attributes = store
                .attributes_of(&LogicalName::from(*resource))
                .cloned()
                .unwrap_or_default();
            attributes.insert((*key).to_owned(), (*value).to_owned());
            store.insert(LogicalName::from(*resource), attributes);
        }
        store
    }

    #[test]
    fn role_policy_is_scoped_to_the_bucket() {
        let resolved = access_role()
            .resolve(&store(&[(STORAGE_BUCKET, "bucket", "worlds-1")]))
            .expect("resolved");

        let policy = resolved.properties.get("inline_policy").expect("policy");
        assert_eq!(
            policy.pointer("/Statement/0/Resource"),
            Some(&json!(["arn:aws:s3:::worlds-1", "arn:aws:s3:::worlds-1/*"]))
        );
        assert_eq!(
            policy.pointer("/Statement/0/Action"),
            Some(&json!(["s3:GetObject", "s3:PutObject", "s3:ListBucket"]))
        );
        let trust = resolved.properties.get("assume_role_policy").expect("trust");
        assert_eq!(
            trust.pointer("/Statement/0/Principal/Service"),
            Some(&json!("ec2.amazonaws.com"))
        );
    }

    #[test]
    fn security_group_declares_the_allow_list() {
        let resolved = security_group()
            .resolve(&AttributeStore::new())
            .expect("no dependencies");
        let ingress = resolved
            .properties
            .get("ingress")
            .and_then(Value::as_array)
            .expect("ingress rules");
        let ports: Vec<(String, u64)> = ingress
            .iter()
            .map(|rule| {
                (
                    rule.get("protocol")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_owned(),
                    rule.get("from_port")
                        .and_then(Value::as_u64)
                        .unwrap_or_default(),
                )
            })
            .collect();
        assert_eq!(
            ports,
            vec![
                (String::from("icmp"), 0),
                (String::from("tcp"), 22),
                (String::from("tcp"), 80),
                (String::from("tcp"), 3389),
                (String::from("tcp"), 25565),
                (String::from("udp"), 25565),
            ]
        );
        assert_eq!(
            resolved.properties.get("egress"),
            Some(&json!([{
                "protocol": "-1",
                "from_port": 0,
                "to_port": 0,
                "cidr_blocks": ["0.0.0.0/0"],
            }]))
        );
    }

    #[test]
    fn bootstrap_content_follows_the_bucket() {
        let descriptor = bootstrap_script(BootstrapSynthesizer::default(), FileTree::new());
        let resolved = descriptor
            .resolve(&store(&[(STORAGE_BUCKET, "bucket", "example-bucket")]))
            .expect("resolved");
        let content = resolved.str_property("content").expect("content");
        assert!(content.contains("export MC_BUCKET=example-bucket"));
    }

    #[test]
    fn instance_fans_in_from_every_prerequisite() {
        let dependencies = server_instance("t3.medium").dependencies();
        let expected = [
            INSTANCE_PROFILE,
            SECURITY_GROUP,
            SSH_KEY,
            MACHINE_IMAGE,
            BOOTSTRAP_SCRIPT,
        ]
        .map(LogicalName::from);
        assert_eq!(dependencies, BTreeSet::from(expected));
    }

    #[test]
    fn instance_replaces_on_launch_data_changes() {
        let descriptor = server_instance("t3.medium");
        assert!(descriptor.replace_on_changes().contains("user_data"));
        assert!(!descriptor.replace_on_changes().contains("instance_type"));
    }

    #[test]
    fn instance_resolves_security_groups_as_a_list() {
        let resolved = server_instance("t3.medium")
            .resolve(&store(&[
                (INSTANCE_PROFILE, "id", "profile-1"),
                (SECURITY_GROUP, "name", "sg-name"),
                (SSH_KEY, "key_name", "key-1"),
                (MACHINE_IMAGE, "id", "ami-1"),
                (BOOTSTRAP_SCRIPT, "content", "#!/bin/bash\n"),
            ]))
            .expect("resolved");
        assert_eq!(resolved.properties.get("security_groups"), Some(&json!(["sg-name"])));
        assert_eq!(resolved.str_property("user_data"), Some("#!/bin/bash\n"));
    }
}
