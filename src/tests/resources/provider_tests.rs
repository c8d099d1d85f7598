use crate::{
    PasswordScore, ProviderConfig, ProviderError, ProviderResult, ProxmoxProvider,
    ResourceHandler,
};
use async_trait::async_trait;
use serde_json::{Value, json};

const ENDPOINT: &str = "https://pve.example.com:8006";
const TOKEN_ID: &str = "automation@pve!provisioner";
const TOKEN_SECRET: &str = "12345678-abcd-4321-8765-1234567890ab";

fn recorded_state() -> Value {
    json!({
        "node": "pve1",
        "vm_id": 210,
        "cores": 1,
        "memory": 512,
        "swap": 512,
        "ostemplate": "local:vztmpl/debian-12-standard_12.2-1_amd64.tar.zst",
        "unprivileged": true,
        "disks": { "rootfs": "local-lvm:8" },
        "networks": { "net0": "name=eth0,bridge=vmbr0,ip=dhcp" },
        "start_on_create": true,
        "status": "running",
        "created_at": 1755700000
    })
}

#[test]
fn test_builder_requires_an_endpoint() {
    let result = ProxmoxProvider::builder()
        .api_token(TOKEN_ID, TOKEN_SECRET)
        .build();
    assert!(matches!(result, Err(ProviderError::InvalidSpec(_))));
}

#[test]
fn test_builder_requires_credentials() {
    let result = ProxmoxProvider::builder().endpoint(ENDPOINT).build();
    assert!(matches!(result, Err(ProviderError::InvalidSpec(_))));
}

#[test]
fn test_builder_rejects_malformed_endpoints() {
    let result = ProxmoxProvider::builder()
        .endpoint("pve.example.com")
        .api_token(TOKEN_ID, TOKEN_SECRET)
        .build();
    assert!(matches!(result, Err(ProviderError::InvalidSpec(_))));
}

#[test]
fn test_builder_rejects_malformed_token_ids() {
    let result = ProxmoxProvider::builder()
        .endpoint(ENDPOINT)
        .api_token("provisioner-without-separators", TOKEN_SECRET)
        .build();
    assert!(matches!(result, Err(ProviderError::InvalidSpec(_))));
}

#[test]
fn test_builder_rejects_weak_passwords_by_default() {
    let result = ProxmoxProvider::builder()
        .endpoint(ENDPOINT)
        .credentials("root", "12345", "pam")
        .build();
    assert!(matches!(result, Err(ProviderError::InvalidSpec(_))));
}

#[test]
fn test_builder_accepts_weak_passwords_when_unscored() {
    let config = ProviderConfig {
        min_password_score: None,
        ..ProviderConfig::default()
    };
    let result = ProxmoxProvider::builder()
        .endpoint(ENDPOINT)
        .config(config)
        .credentials("root", "12345", "pam")
        .build();
    assert!(result.is_ok());
}

#[test]
fn test_default_configuration_values() {
    let config = ProviderConfig::default();
    assert_eq!(config.http_timeout.as_secs(), 30);
    assert_eq!(config.poll.deadline.as_secs(), 600);
    assert_eq!(config.retry.max_attempts, 5);
    assert_eq!(config.min_password_score, Some(PasswordScore::Three));
    assert!(config.rate_limit.is_none());
    assert!(config.default_node.is_none());
}

fn test_provider() -> ProxmoxProvider {
    ProxmoxProvider::builder()
        .endpoint(ENDPOINT)
        .api_token(TOKEN_ID, TOKEN_SECRET)
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_unknown_resource_types_are_rejected() {
    let provider = test_provider();
    let err = provider
        .create("proxmox:qemu", json!({ "vm_id": 100 }))
        .await
        .unwrap_err();
    match err {
        ProviderError::UnknownResourceType(name) => assert_eq!(name, "proxmox:qemu"),
        other => panic!("expected UnknownResourceType, got {other:?}"),
    }
}

#[test]
fn test_diff_reports_in_place_changes() {
    let provider = test_provider();
    let mut desired = recorded_state();
    desired["cores"] = json!(2);

    let plan = provider
        .diff("proxmox:lxc", desired, recorded_state())
        .unwrap();

    assert_eq!(plan["severity"], "update_in_place");
    assert_eq!(plan["requires_replace"], false);
    assert_eq!(plan["changes"][0]["field"], "cores");
    assert_eq!(plan["changes"][0]["kind"], "update_in_place");
}

#[test]
fn test_diff_reports_replacement_for_identity_changes() {
    let provider = test_provider();
    let mut desired = recorded_state();
    desired["vm_id"] = json!(211);

    let plan = provider
        .diff("proxmox:lxc", desired, recorded_state())
        .unwrap();

    assert_eq!(plan["severity"], "forces_replace");
    assert_eq!(plan["requires_replace"], true);
}

#[test]
fn test_diff_is_empty_for_matching_documents() {
    let provider = test_provider();
    let plan = provider
        .diff("proxmox:lxc", recorded_state(), recorded_state())
        .unwrap();

    assert_eq!(plan["severity"], "unchanged");
    assert_eq!(plan["changes"], json!([]));
}

#[test]
fn test_default_node_fills_an_omitted_node() {
    let provider = ProxmoxProvider::builder()
        .endpoint(ENDPOINT)
        .api_token(TOKEN_ID, TOKEN_SECRET)
        .default_node("pve1")
        .build()
        .unwrap();

    let mut desired = recorded_state();
    desired.as_object_mut().unwrap().remove("node");
    let plan = provider
        .diff("proxmox:lxc", desired, recorded_state())
        .unwrap();

    assert_eq!(plan["severity"], "unchanged");
}

struct EchoHandler;

#[async_trait]
impl ResourceHandler for EchoHandler {
    fn type_name(&self) -> &'static str {
        "proxmox:echo"
    }

    async fn create(&self, spec: Value) -> ProviderResult<Value> {
        Ok(spec)
    }

    async fn read(&self, state: Value) -> ProviderResult<Option<Value>> {
        Ok(Some(state))
    }

    async fn update(&self, spec: Value, _state: Value) -> ProviderResult<Value> {
        Ok(json!({ "action": "updated", "state": spec }))
    }

    async fn delete(&self, _state: Value) -> ProviderResult<()> {
        Ok(())
    }

    fn diff(&self, _spec: Value, _state: Value) -> ProviderResult<Value> {
        Ok(json!({ "severity": "unchanged" }))
    }
}

#[tokio::test]
async fn test_additional_handlers_can_be_registered() {
    let mut provider = test_provider();
    provider.register(Box::new(EchoHandler));

    let state = provider
        .create("proxmox:echo", json!({ "anything": true }))
        .await
        .unwrap();
    assert_eq!(state, json!({ "anything": true }));
}
