use super::*;
use crate::model::{Reference, Value};
use serde_json::json;

const STACK: &str = r#"
    stack "fibonacci"

    setting "desired_count" 1

    stage "dev" {
        setting "domain_names" "dev.example.com"
    }

    stage "prod" {
        setting "domain_names" "app.example.com" "www.example.com"
        setting "desired_count" 2
    }

    resource "ec2.vpc" "api_vpc" {
        max_azs 2
        nat_gateways 1
    }

    resource "ecs.cluster" "api_cluster" {
        vpc (ref)"api_vpc"
    }

    resource "ecs.fargate_service" "backend" {
        cluster (ref)"api_cluster.arn"
        desired_count (setting)"desired_count"
    }

    resource "cloudfront.distribution" "cdn" {
        domain_names (setting)"domain_names"
    }

    output "api_url" (ref)"backend.load_balancer_dns_name"
    output "cdn_domain" (ref)"cdn.domain_name"
"#;

#[test]
fn test_parse_stack_with_stage() {
    let stack = parse_kdl_string_with_stage(STACK, "default".to_string(), Some("prod")).unwrap();

    assert_eq!(stack.name, "fibonacci");
    assert_eq!(stack.stage.as_deref(), Some("prod"));
    assert_eq!(stack.stages, vec!["dev", "prod"]);
    assert_eq!(stack.declaration.len(), 4);

    let backend = stack.declaration.get("backend").unwrap();
    // ステージ設定がデフォルトを上書き
    assert_eq!(backend.properties["desired_count"], Value::literal(2));

    let cdn = stack.declaration.get("cdn").unwrap();
    assert_eq!(
        cdn.properties["domain_names"],
        Value::literal(json!(["app.example.com", "www.example.com"]))
    );

    assert_eq!(stack.outputs.len(), 2);
    assert_eq!(
        stack.output("cdn_domain").unwrap().value,
        Value::Reference(Reference::new("cdn", "domain_name"))
    );
}

#[test]
fn test_parse_stack_default_settings() {
    let stack = parse_kdl_string_with_stage(STACK, "default".to_string(), Some("dev")).unwrap();
    let backend = stack.declaration.get("backend").unwrap();
    assert_eq!(backend.properties["desired_count"], Value::literal(1));
}

#[test]
fn test_parse_stack_without_stage_fails_on_stage_setting() {
    // domain_names はステージ固有の設定なのでステージ未指定ではエラー
    let err = parse_kdl_string(STACK, "default".to_string()).unwrap_err();
    assert!(matches!(err, FlowError::MissingSetting { ref name, stage: None } if name == "domain_names"));
}

#[test]
fn test_parse_unknown_stage() {
    let err = parse_kdl_string_with_stage(STACK, "default".to_string(), Some("stg")).unwrap_err();
    assert!(matches!(err, FlowError::StageNotFound(ref s) if s == "stg"));
}

#[test]
fn test_parse_duplicate_logical_id() {
    let kdl = r#"
        resource "s3.bucket" "site"
        resource "s3.bucket" "site"
    "#;
    let err = parse_kdl_string(kdl, "test".to_string()).unwrap_err();
    assert!(matches!(err, FlowError::DuplicateId(ref id) if id == "site"));
}

#[test]
fn test_parse_unknown_top_level_node() {
    let kdl = r#"
        service "postgres" {
            image "postgres:16"
        }
    "#;
    let err = parse_kdl_string(kdl, "test".to_string()).unwrap_err();
    assert!(matches!(err, FlowError::InvalidConfig(_)));
}

#[test]
fn test_parse_default_name() {
    let stack = parse_kdl_string(r#"resource "s3.bucket" "site""#, "my-dir".to_string()).unwrap();
    assert_eq!(stack.name, "my-dir");
    assert!(stack.outputs.is_empty());
}

#[test]
fn test_parse_kdl_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("stack.kdl");
    std::fs::write(&path, STACK).unwrap();

    let stack = parse_kdl_file(&path, Some("dev")).unwrap();
    assert_eq!(stack.declaration.len(), 4);
}
