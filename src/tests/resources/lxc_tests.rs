use crate::{PollConfig, ProviderConfig, ProviderError, ProxmoxProvider, RetryConfig};
use serde_json::{Value, json};
use std::time::Duration;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{body_json, method, path},
};

const CREATE_UPID: &str = "UPID:pve1:0003C4D7:0914BE8C:68A0F4C2:vzcreate:210:root@pam:";
const DESTROY_UPID: &str = "UPID:pve1:0003C4D8:0914BF11:68A0F4D0:vzdestroy:210:root@pam:";
const STOP_UPID: &str = "UPID:pve1:0003C4D9:0914BF52:68A0F4D8:vzstop:210:root@pam:";
const RESIZE_UPID: &str = "UPID:pve1:0003C4DA:0914BF90:68A0F4E0:resize:210:root@pam:";

fn fast_config() -> ProviderConfig {
    ProviderConfig {
        poll: PollConfig {
            initial_interval: Duration::from_millis(10),
            max_interval: Duration::from_millis(40),
            deadline: Duration::from_secs(5),
            max_poll_failures: 3,
        },
        retry: RetryConfig {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            backoff_factor: 2.0,
            max_delay: Duration::from_millis(4),
        },
        ..ProviderConfig::default()
    }
}

fn test_provider(server: &MockServer) -> ProxmoxProvider {
    ProxmoxProvider::builder()
        .endpoint(server.uri())
        .api_token(
            "automation@pve!provisioner",
            "12345678-abcd-4321-8765-1234567890ab",
        )
        .config(fast_config())
        .build()
        .unwrap()
}

fn task_path(upid: &str) -> String {
    format!("/api2/json/nodes/pve1/tasks/{upid}/status")
}

async fn mock_task_ok(server: &MockServer, upid: &str) {
    Mock::given(method("GET"))
        .and(path(task_path(upid)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": { "status": "stopped", "exitstatus": "OK" }
        })))
        .mount(server)
        .await;
}

async fn mock_current_status(server: &MockServer, status: &str) {
    Mock::given(method("GET"))
        .and(path("/api2/json/nodes/pve1/lxc/210/status/current"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": { "status": status }
        })))
        .mount(server)
        .await;
}

fn desired_spec() -> Value {
    json!({
        "node": "pve1",
        "vm_id": 210,
        "hostname": "web-01",
        "cores": 1,
        "memory": 512,
        "swap": 512,
        "ostemplate": "local:vztmpl/debian-12-standard_12.2-1_amd64.tar.zst",
        "password": "correct-horse-battery-staple",
        "disks": { "rootfs": "local-lvm:8" },
        "networks": { "net0": "name=eth0,bridge=vmbr0,ip=dhcp" },
        "start_on_create": false
    })
}

fn recorded_state() -> Value {
    json!({
        "node": "pve1",
        "vm_id": 210,
        "hostname": "web-01",
        "cores": 1,
        "memory": 512,
        "swap": 512,
        "ostemplate": "local:vztmpl/debian-12-standard_12.2-1_amd64.tar.zst",
        "unprivileged": true,
        "disks": { "rootfs": "local-lvm:8" },
        "networks": { "net0": "name=eth0,bridge=vmbr0,ip=dhcp" },
        "start_on_create": false,
        "status": "running",
        "created_at": 1755700000,
        "task_history": [CREATE_UPID]
    })
}

#[tokio::test]
async fn test_create_tracks_task_and_records_state() {
    let mock_server = MockServer::start().await;
    let provider = test_provider(&mock_server);

    Mock::given(method("POST"))
        .and(path("/api2/json/nodes/pve1/lxc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": CREATE_UPID })))
        .expect(1)
        .mount(&mock_server)
        .await;
    mock_task_ok(&mock_server, CREATE_UPID).await;
    mock_current_status(&mock_server, "stopped").await;

    let state = provider
        .create("proxmox:lxc", desired_spec())
        .await
        .unwrap();

    assert_eq!(state["vm_id"], 210);
    assert_eq!(state["status"], "stopped");
    assert_eq!(state["task_history"], json!([CREATE_UPID]));
    assert!(state.get("password").is_none());
    assert!(state["created_at"].as_u64().unwrap() > 0);
}

#[tokio::test]
async fn test_create_failure_runs_compensating_delete() {
    let mock_server = MockServer::start().await;
    let provider = test_provider(&mock_server);

    Mock::given(method("POST"))
        .and(path("/api2/json/nodes/pve1/lxc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": CREATE_UPID })))
        .expect(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path(task_path(CREATE_UPID)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {
                "status": "stopped",
                "exitstatus": "unable to create CT 210: no such storage 'fast-nvme'"
            }
        })))
        .mount(&mock_server)
        .await;
    // The half-created container still answers a status probe.
    mock_current_status(&mock_server, "stopped").await;
    Mock::given(method("DELETE"))
        .and(path("/api2/json/nodes/pve1/lxc/210"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": DESTROY_UPID })))
        .expect(1)
        .mount(&mock_server)
        .await;
    mock_task_ok(&mock_server, DESTROY_UPID).await;

    let err = provider
        .create("proxmox:lxc", desired_spec())
        .await
        .unwrap_err();

    match err {
        ProviderError::TaskFailed { upid, reason } => {
            assert_eq!(upid, CREATE_UPID);
            assert!(reason.contains("no such storage"));
        }
        other => panic!("expected TaskFailed, got {other:?}"),
    }
}

#[tokio::test]
async fn test_create_start_failure_is_not_fatal() {
    let mock_server = MockServer::start().await;
    let provider = test_provider(&mock_server);

    Mock::given(method("POST"))
        .and(path("/api2/json/nodes/pve1/lxc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": CREATE_UPID })))
        .mount(&mock_server)
        .await;
    mock_task_ok(&mock_server, CREATE_UPID).await;
    Mock::given(method("POST"))
        .and(path("/api2/json/nodes/pve1/lxc/210/status/start"))
        .respond_with(
            ResponseTemplate::new(500).set_body_string("command 'lxc-start' failed: exit code 1"),
        )
        .expect(1)
        .mount(&mock_server)
        .await;
    mock_current_status(&mock_server, "stopped").await;

    let mut spec = desired_spec();
    spec["start_on_create"] = json!(true);
    let state = provider.create("proxmox:lxc", spec).await.unwrap();

    assert_eq!(state["status"], "stopped");
    assert_eq!(state["task_history"], json!([CREATE_UPID]));
}

#[tokio::test]
async fn test_runtime_changes_apply_in_one_config_write() {
    let mock_server = MockServer::start().await;
    let provider = test_provider(&mock_server);

    // Only the changed options may appear in the request body.
    Mock::given(method("PUT"))
        .and(path("/api2/json/nodes/pve1/lxc/210/config"))
        .and(body_json(json!({ "cores": 2, "memory": 1024 })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": null })))
        .expect(1)
        .mount(&mock_server)
        .await;
    mock_current_status(&mock_server, "running").await;

    let mut desired = desired_spec();
    desired["cores"] = json!(2);
    desired["memory"] = json!(1024);
    let result = provider
        .update("proxmox:lxc", desired, recorded_state())
        .await
        .unwrap();

    assert_eq!(result["action"], "updated");
    assert_eq!(result["state"]["cores"], 2);
    assert_eq!(result["state"]["memory"], 1024);
    assert_eq!(result["state"]["created_at"], 1755700000);
    assert_eq!(result["state"]["task_history"], json!([CREATE_UPID]));
}

#[tokio::test]
async fn test_unchanged_spec_touches_nothing() {
    let mock_server = MockServer::start().await;
    let provider = test_provider(&mock_server);

    // "8.0" and "8" describe the same disk.
    let mut desired = desired_spec();
    desired["disks"]["rootfs"] = json!("local-lvm:8.0");
    let result = provider
        .update("proxmox:lxc", desired, recorded_state())
        .await
        .unwrap();

    assert_eq!(result["action"], "unchanged");
    assert_eq!(result["state"], recorded_state());
    assert!(mock_server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_disk_grow_issues_one_resize() {
    let mock_server = MockServer::start().await;
    let provider = test_provider(&mock_server);

    Mock::given(method("PUT"))
        .and(path("/api2/json/nodes/pve1/lxc/210/resize"))
        .and(body_json(json!({ "disk": "rootfs", "size": "16G" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": RESIZE_UPID })))
        .expect(1)
        .mount(&mock_server)
        .await;
    mock_task_ok(&mock_server, RESIZE_UPID).await;
    mock_current_status(&mock_server, "running").await;
    // A grow must not rewrite the configuration or replace the container.
    Mock::given(method("PUT"))
        .and(path("/api2/json/nodes/pve1/lxc/210/config"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&mock_server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/api2/json/nodes/pve1/lxc/210"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&mock_server)
        .await;

    let mut desired = desired_spec();
    desired["disks"]["rootfs"] = json!("local-lvm:16");
    let result = provider
        .update("proxmox:lxc", desired, recorded_state())
        .await
        .unwrap();

    assert_eq!(result["action"], "updated");
    assert_eq!(result["state"]["disks"]["rootfs"], "local-lvm:16");
    assert_eq!(
        result["state"]["task_history"],
        json!([CREATE_UPID, RESIZE_UPID])
    );
}

#[tokio::test]
async fn test_disk_shrink_replaces_the_container() {
    let mock_server = MockServer::start().await;
    let provider = test_provider(&mock_server);

    mock_current_status(&mock_server, "stopped").await;
    Mock::given(method("DELETE"))
        .and(path("/api2/json/nodes/pve1/lxc/210"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": DESTROY_UPID })))
        .expect(1)
        .mount(&mock_server)
        .await;
    mock_task_ok(&mock_server, DESTROY_UPID).await;
    Mock::given(method("POST"))
        .and(path("/api2/json/nodes/pve1/lxc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": CREATE_UPID })))
        .expect(1)
        .mount(&mock_server)
        .await;
    mock_task_ok(&mock_server, CREATE_UPID).await;

    let mut desired = desired_spec();
    desired["disks"]["rootfs"] = json!("local-lvm:4");
    let result = provider
        .update("proxmox:lxc", desired, recorded_state())
        .await
        .unwrap();

    assert_eq!(result["action"], "replaced");
    assert_eq!(result["state"]["disks"]["rootfs"], "local-lvm:4");
}

#[tokio::test]
async fn test_update_failure_surfaces_partial_state() {
    let mock_server = MockServer::start().await;
    let provider = test_provider(&mock_server);

    Mock::given(method("PUT"))
        .and(path("/api2/json/nodes/pve1/lxc/210/config"))
        .and(body_json(json!({ "memory": 1024 })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": null })))
        .expect(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/api2/json/nodes/pve1/lxc/210/resize"))
        .respond_with(
            ResponseTemplate::new(400).set_body_string("parameter verification failed"),
        )
        .expect(1)
        .mount(&mock_server)
        .await;
    // The fresh read shows the memory change applied, the disk untouched.
    Mock::given(method("GET"))
        .and(path("/api2/json/nodes/pve1/lxc/210/config"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {
                "hostname": "web-01",
                "cores": 1,
                "memory": 1024,
                "swap": 512,
                "unprivileged": 1,
                "rootfs": "local-lvm:vm-210-disk-0,size=8G",
                "net0": "name=eth0,bridge=vmbr0,hwaddr=BC:24:11:2A:3B:4C,ip=dhcp,type=veth"
            }
        })))
        .mount(&mock_server)
        .await;
    mock_current_status(&mock_server, "running").await;

    let mut desired = desired_spec();
    desired["memory"] = json!(1024);
    desired["disks"]["rootfs"] = json!("local-lvm:16");
    let err = provider
        .update("proxmox:lxc", desired, recorded_state())
        .await
        .unwrap_err();

    match err {
        ProviderError::PartialUpdate { state, source } => {
            assert_eq!(state.spec.memory, 1024);
            assert_eq!(
                state.spec.disks.get("rootfs").map(String::as_str),
                Some("local-lvm:8")
            );
            assert!(matches!(*source, ProviderError::Api { status: 400, .. }));
        }
        other => panic!("expected PartialUpdate, got {other:?}"),
    }
}

#[tokio::test]
async fn test_delete_absent_container_succeeds() {
    let mock_server = MockServer::start().await;
    let provider = test_provider(&mock_server);

    Mock::given(method("GET"))
        .and(path("/api2/json/nodes/pve1/lxc/210/status/current"))
        .respond_with(
            ResponseTemplate::new(500)
                .set_body_string("Configuration file 'nodes/pve1/lxc/210.conf' does not exist"),
        )
        .mount(&mock_server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/api2/json/nodes/pve1/lxc/210"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&mock_server)
        .await;

    provider
        .delete("proxmox:lxc", recorded_state())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_delete_stops_running_container_first() {
    let mock_server = MockServer::start().await;
    let provider = test_provider(&mock_server);

    mock_current_status(&mock_server, "running").await;
    Mock::given(method("POST"))
        .and(path("/api2/json/nodes/pve1/lxc/210/status/stop"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": STOP_UPID })))
        .expect(1)
        .mount(&mock_server)
        .await;
    mock_task_ok(&mock_server, STOP_UPID).await;
    Mock::given(method("DELETE"))
        .and(path("/api2/json/nodes/pve1/lxc/210"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": DESTROY_UPID })))
        .expect(1)
        .mount(&mock_server)
        .await;
    mock_task_ok(&mock_server, DESTROY_UPID).await;

    provider
        .delete("proxmox:lxc", recorded_state())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_locked_container_delete_is_retried() {
    let mock_server = MockServer::start().await;
    let provider = test_provider(&mock_server);

    mock_current_status(&mock_server, "stopped").await;
    Mock::given(method("DELETE"))
        .and(path("/api2/json/nodes/pve1/lxc/210"))
        .respond_with(ResponseTemplate::new(500).set_body_string("CT is locked (create)"))
        .up_to_n_times(1)
        .expect(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/api2/json/nodes/pve1/lxc/210"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": DESTROY_UPID })))
        .expect(1)
        .mount(&mock_server)
        .await;
    mock_task_ok(&mock_server, DESTROY_UPID).await;

    provider
        .delete("proxmox:lxc", recorded_state())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_read_reports_drift_when_container_is_gone() {
    let mock_server = MockServer::start().await;
    let provider = test_provider(&mock_server);

    Mock::given(method("GET"))
        .and(path("/api2/json/nodes/pve1/lxc/210/config"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&mock_server)
        .await;

    let live = provider
        .read("proxmox:lxc", recorded_state())
        .await
        .unwrap();
    assert!(live.is_none());
}

#[tokio::test]
async fn test_read_keeps_recorded_forms_for_equivalent_values() {
    let mock_server = MockServer::start().await;
    let provider = test_provider(&mock_server);

    Mock::given(method("GET"))
        .and(path("/api2/json/nodes/pve1/lxc/210/config"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {
                "hostname": "web-01",
                "cores": 1,
                "memory": 512,
                "swap": 512,
                "unprivileged": 1,
                "rootfs": "local-lvm:vm-210-disk-0,size=8G",
                "net0": "name=eth0,bridge=vmbr0,hwaddr=BC:24:11:2A:3B:4C,ip=dhcp,type=veth"
            }
        })))
        .mount(&mock_server)
        .await;
    mock_current_status(&mock_server, "running").await;

    let live = provider
        .read("proxmox:lxc", recorded_state())
        .await
        .unwrap()
        .unwrap();

    // The expanded live values map back to the recorded forms, so an
    // untouched container shows no drift.
    assert_eq!(live["disks"]["rootfs"], "local-lvm:8");
    assert_eq!(live["networks"]["net0"], "name=eth0,bridge=vmbr0,ip=dhcp");
    assert_eq!(live["created_at"], 1755700000);
    assert_eq!(
        live["ostemplate"],
        "local:vztmpl/debian-12-standard_12.2-1_amd64.tar.zst"
    );
}

#[tokio::test]
async fn test_create_timeout_leaves_container_readable() {
    let mock_server = MockServer::start().await;
    let mut config = fast_config();
    config.poll.deadline = Duration::from_millis(80);
    let provider = ProxmoxProvider::builder()
        .endpoint(mock_server.uri())
        .api_token(
            "automation@pve!provisioner",
            "12345678-abcd-4321-8765-1234567890ab",
        )
        .config(config)
        .build()
        .unwrap();

    Mock::given(method("POST"))
        .and(path("/api2/json/nodes/pve1/lxc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": CREATE_UPID })))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path(task_path(CREATE_UPID)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": { "status": "running" }
        })))
        .mount(&mock_server)
        .await;
    // The cleanup probe finds nothing to delete yet.
    Mock::given(method("GET"))
        .and(path("/api2/json/nodes/pve1/lxc/210/status/current"))
        .respond_with(ResponseTemplate::new(404))
        .up_to_n_times(1)
        .mount(&mock_server)
        .await;

    let err = provider
        .create("proxmox:lxc", desired_spec())
        .await
        .unwrap_err();
    assert!(matches!(err, ProviderError::Timeout { .. }));

    // The task may still have finished on the hypervisor; a later read
    // sees whatever it produced.
    Mock::given(method("GET"))
        .and(path("/api2/json/nodes/pve1/lxc/210/config"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {
                "hostname": "web-01",
                "cores": 1,
                "memory": 512,
                "rootfs": "local-lvm:vm-210-disk-0,size=8G"
            }
        })))
        .mount(&mock_server)
        .await;
    mock_current_status(&mock_server, "stopped").await;

    let live = provider
        .read("proxmox:lxc", recorded_state())
        .await
        .unwrap();
    assert!(live.is_some());
}
