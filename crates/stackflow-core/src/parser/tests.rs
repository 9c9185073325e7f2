use super::*;
use crate::builtin::infrastructure_stack;
use crate::model::{ResourceKind, ResourceSpec};

const INFRASTRUCTURE_KDL: &str = include_str!("../../stacks/infrastructure.kdl");

#[test]
fn test_bundled_stack_matches_builtin() {
    let parsed = parse_stack_string(INFRASTRUCTURE_KDL, "infrastructure".to_string()).unwrap();
    let builtin = infrastructure_stack().unwrap();
    assert_eq!(parsed, builtin);
}

#[test]
fn test_stack_node_sets_metadata() {
    let kdl = r#"
        stack "demo" {
            description "demo stack"
            region "ap-northeast-1"
        }
    "#;

    let stack = parse_stack_string(kdl, "fallback".to_string()).unwrap();
    assert_eq!(stack.name, "demo");
    assert_eq!(stack.description.as_deref(), Some("demo stack"));
    assert_eq!(stack.region.as_deref(), Some("ap-northeast-1"));
    assert!(stack.is_empty());
}

#[test]
fn test_default_name_without_stack_node() {
    let kdl = r#"
        bucket "data"
    "#;

    let stack = parse_stack_string(kdl, "fallback".to_string()).unwrap();
    assert_eq!(stack.name, "fallback");
    assert_eq!(stack.len(), 1);
}

#[test]
fn test_top_level_nodegroup() {
    let kdl = r#"
        role "admin" {
            assumed-by "eks.amazonaws.com"
        }
        cluster "dev" {
            version "1.29"
            masters-role "admin"
        }
        nodegroup "workers" {
            cluster "dev"
            instance-types "m5.large" "m5.xlarge"
            min-size 2
            max-size 4
            desired-size 2
        }
    "#;

    let stack = parse_stack_string(kdl, "test".to_string()).unwrap();
    assert_eq!(stack.len(), 3);

    let Some(ResourceSpec::Cluster(cluster)) = stack.get("dev").map(|r| &r.spec) else {
        panic!("dev should be a cluster");
    };
    // default-capacity 省略時のデフォルト
    assert_eq!(cluster.default_capacity, 2);
    assert_eq!(cluster.version.to_string(), "1.29");

    let Some(ResourceSpec::Nodegroup(ng)) = stack.get("workers").map(|r| &r.spec) else {
        panic!("workers should be a nodegroup");
    };
    assert_eq!(ng.cluster, "dev");
    assert_eq!(ng.instance_types, vec!["m5.large", "m5.xlarge"]);
    assert_eq!((ng.min_size, ng.max_size, ng.desired_size), (2, 4, 2));
}

#[test]
fn test_depends_on() {
    let kdl = r#"
        bucket "logs"
        bucket "data" {
            depends-on "logs"
        }
    "#;

    let stack = parse_stack_string(kdl, "test".to_string()).unwrap();
    let data = stack.get("data").unwrap();
    assert_eq!(data.depends_on, vec!["logs"]);
    assert_eq!(data.dependencies(), vec!["logs"]);
}

#[test]
fn test_duplicate_logical_id() {
    let kdl = r#"
        bucket "data"
        role "data" {
            assumed-by "ec2.amazonaws.com"
        }
    "#;

    let result = parse_stack_string(kdl, "test".to_string());
    assert!(matches!(result, Err(FlowError::DuplicateResource(id)) if id == "data"));
}

#[test]
fn test_unknown_top_level_nodes_are_skipped() {
    let kdl = r#"
        output "whatever"
        bucket "data"
    "#;

    let stack = parse_stack_string(kdl, "test".to_string()).unwrap();
    assert_eq!(stack.by_kind(ResourceKind::Bucket).len(), 1);
}

#[test]
fn test_invalid_kdl() {
    let result = parse_stack_string("bucket \"data\" {", "test".to_string());
    assert!(matches!(result, Err(FlowError::KdlParse(_))));
}

#[test]
fn test_load_stack_file_uses_file_stem() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sandbox.kdl");
    std::fs::write(&path, "bucket \"data\"\n").unwrap();

    let stack = load_stack_file(&path).unwrap();
    assert_eq!(stack.name, "sandbox");
    assert_eq!(stack.len(), 1);
}

#[test]
fn test_load_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let result = load_stack_file(dir.path().join("missing.kdl"));
    assert!(matches!(result, Err(FlowError::IoError { .. })));
}
