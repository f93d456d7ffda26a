//! Network Operation Tests
//!
//! Runs every operation end to end against the simulated network:
//! - Ping and restart bit results
//! - RF signal test at the coordinator and across FRC batches
//! - Configuration read
//! - Coordinator restore
//! - Failure statuses and the transaction trail

use std::sync::Arc;

use iqmesh_dpa::{cmd, pnum, DpaConfig, DpaService, ErrorCode, FrcResponseTime};
use iqmesh_services::{
    NetworkOperation, NetworkService, NodeOutcome, OperationRequest, OperationSummary,
    RestoreParams, ServiceConfig, TestRfParams,
};
use iqmesh_testing::{mid_for, sequential_network, small_network, NetworkSpec, SimulatedNetwork, SimulatedNode};

fn setup(spec: NetworkSpec) -> (Arc<SimulatedNetwork>, NetworkService) {
    let network = Arc::new(SimulatedNetwork::new(spec).unwrap());
    let dpa = Arc::new(DpaService::new(
        network.clone(),
        DpaConfig::default().with_retry_delay_ms(0),
    ));
    (network, NetworkService::new(dpa, ServiceConfig::default()))
}

fn ping() -> OperationRequest {
    OperationRequest::new(NetworkOperation::Ping { hwpid: 0xFFFF })
}

fn test_rf(device_addr: u16) -> OperationRequest {
    OperationRequest::new(NetworkOperation::TestRfSignal(TestRfParams {
        device_addr,
        rf_channel: 52,
        rx_filter: 5,
        measurement_time_ms: 360,
    }))
}

async fn count_commands(network: &SimulatedNetwork, pnum: u8, pcmd: u8) -> usize {
    network
        .requests()
        .await
        .iter()
        .filter(|r| r.pnum == pnum && r.pcmd == pcmd)
        .count()
}

#[tokio::test]
async fn test_ping_reports_each_bonded_node() {
    let (network, service) = setup(small_network());
    network.set_frc_response_time(FrcResponseTime::Ms360).await;

    let result = service.execute(ping()).await;

    assert_eq!(result.status, 0);
    assert_eq!(result.status_str, "ok");
    assert_eq!(result.per_node_results.len(), 3);
    assert_eq!(result.per_node_results[&1], NodeOutcome::Responded(true));
    assert_eq!(result.per_node_results[&2], NodeOutcome::Responded(false));
    assert_eq!(result.per_node_results[&5], NodeOutcome::Responded(true));
    assert_eq!(
        result.summary,
        Some(OperationSummary::Ping {
            hwpid: 0xFFFF,
            nodes_nr: 3,
            inaccessible_nodes_nr: 1
        })
    );
    // bonded nodes, set FRC time, FRC, restore FRC time
    assert_eq!(result.trail.len(), 4);
    assert_eq!(network.frc_response_time().await, FrcResponseTime::Ms360);
}

#[tokio::test]
async fn test_ping_keeps_frc_flags() {
    let (network, service) = setup(small_network());
    let offline_360 = iqmesh_dpa::frc::OFFLINE_FRC_MASK | FrcResponseTime::Ms360.as_byte();
    network.set_frc_params(offline_360).await;

    let result = service.execute(ping()).await;

    assert_eq!(result.status, 0, "{}", result.status_str);
    assert_eq!(network.frc_params().await, offline_360);

    // the fan-out ran at 40 ms with the offline flag still set
    let params_sent: Vec<u8> = network
        .requests()
        .await
        .iter()
        .filter(|r| r.pnum == pnum::FRC && r.pcmd == cmd::frc::SET_PARAMS)
        .map(|r| r.pdata[0])
        .collect();
    assert_eq!(
        params_sent,
        vec![FrcResponseTime::Ms40.as_byte(), iqmesh_dpa::frc::OFFLINE_FRC_MASK, offline_360]
    );
    assert_eq!(result.trail.len(), 5);
}

#[tokio::test]
async fn test_ping_hwpid_filter() {
    let spec = NetworkSpec::default().with_nodes([
        SimulatedNode::new(1, mid_for(1)),
        SimulatedNode::new(5, mid_for(5)).with_hwpid(0x1234),
    ]);
    let (_network, service) = setup(spec);

    let result = service
        .execute(OperationRequest::new(NetworkOperation::Ping { hwpid: 0x1234 }))
        .await;

    assert_eq!(result.status, 0);
    assert_eq!(result.per_node_results[&1], NodeOutcome::Responded(false));
    assert_eq!(result.per_node_results[&5], NodeOutcome::Responded(true));
}

#[tokio::test]
async fn test_restart_acknowledgements() {
    let spec = NetworkSpec::default().with_nodes([
        SimulatedNode::new(1, mid_for(1)),
        SimulatedNode::new(2, mid_for(2)),
        SimulatedNode::new(5, mid_for(5)).offline(),
    ]);
    let (network, service) = setup(spec);

    let result = service
        .execute(OperationRequest::new(NetworkOperation::Restart { hwpid: 0xFFFF }))
        .await;

    assert_eq!(result.status, 0);
    assert_eq!(result.per_node_results[&1], NodeOutcome::Responded(true));
    assert_eq!(result.per_node_results[&2], NodeOutcome::Responded(true));
    assert_eq!(result.per_node_results[&5], NodeOutcome::Responded(false));
    assert_eq!(network.restarts(1).await, 1);
    assert_eq!(network.restarts(5).await, 0);
}

#[tokio::test]
async fn test_empty_network_stops_after_bonded_query() {
    let (network, service) = setup(NetworkSpec::default());

    let result = service.execute(ping()).await;

    assert_eq!(result.status, 1003);
    assert_eq!(result.status_str, "There are no bonded nodes in network.");
    assert_eq!(result.trail.len(), 1);
    assert_eq!(network.request_count().await, 1);
    assert!(result.per_node_results.is_empty());
}

#[tokio::test]
async fn test_rf_signal_across_two_batches() {
    let (network, service) = setup(sequential_network(70));

    let result = service.execute(test_rf(255)).await;

    assert_eq!(result.status, 0, "{}", result.status_str);
    assert_eq!(result.per_node_results.len(), 70);
    for address in 1..=70u8 {
        assert_eq!(
            result.per_node_results[&address],
            NodeOutcome::RfSignal {
                counter: Some(address % 50)
            }
        );
    }
    assert_eq!(count_commands(&network, pnum::FRC, cmd::frc::SEND_SELECTIVE).await, 2);
    assert_eq!(count_commands(&network, pnum::FRC, cmd::frc::EXTRA_RESULT).await, 1);
    assert_eq!(network.frc_response_time().await, FrcResponseTime::Ms40);
}

#[tokio::test]
async fn test_rf_signal_at_coordinator() {
    let (network, service) = setup(NetworkSpec::default().with_coordinator_rf_counter(17));

    let result = service.execute(test_rf(0)).await;

    assert_eq!(result.status, 0, "{}", result.status_str);
    assert_eq!(
        result.per_node_results[&0],
        NodeOutcome::RfSignal { counter: Some(17) }
    );
    let requests = network.requests().await;
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].pdata, vec![52, 5, 36, 0]);
}

#[tokio::test]
async fn test_rf_signal_batch_failure_restores_frc_time() {
    let (network, service) = setup(sequential_network(70));
    network
        .fail_command(pnum::FRC, cmd::frc::SEND_SELECTIVE, 5)
        .await;

    let result = service.execute(test_rf(255).with_repeat(1)).await;

    assert_eq!(result.status, -1);
    assert!(result.per_node_results.is_empty());
    // bonded nodes, set FRC time, two FRC attempts, restore FRC time
    assert_eq!(result.trail.len(), 5);
    assert_eq!(network.frc_response_time().await, FrcResponseTime::Ms40);
    let last = network.requests().await.pop().unwrap();
    assert_eq!((last.pnum, last.pcmd), (pnum::FRC, cmd::frc::SET_PARAMS));
}

#[tokio::test]
async fn test_bad_frc_status_restores_frc_time() {
    let (network, service) = setup(small_network());
    network.set_frc_response_time(FrcResponseTime::Ms680).await;
    network.override_frc_status(Some(0xFE)).await;

    let result = service.execute(ping()).await;

    assert_eq!(result.status, 1000);
    assert_eq!(result.status_str, "Bad FRC status: 254");
    assert_eq!(network.frc_response_time().await, FrcResponseTime::Ms680);
}

#[tokio::test]
async fn test_transient_timeout_is_retried() {
    let (network, service) = setup(small_network());
    network.fail_next(1).await;

    let result = service.execute(ping().with_repeat(1)).await;

    assert_eq!(result.status, 0);
    assert_eq!(result.trail.len(), 5);
    assert!(!result.trail[0].error_code.is_ok());
    assert!(result.trail[1].error_code.is_ok());
}

#[tokio::test]
async fn test_invalid_parameters_send_nothing() {
    let (network, service) = setup(small_network());
    let bad_rf = OperationRequest::new(NetworkOperation::TestRfSignal(TestRfParams {
        device_addr: 255,
        rf_channel: 52,
        rx_filter: 5,
        measurement_time_ms: 100,
    }));
    let bad_config = OperationRequest::new(NetworkOperation::ReadConfig {
        device_addr: 300,
        hwpid: 0xFFFF,
    });

    let rf = service.execute(bad_rf).await;
    let config = service.execute(bad_config).await;

    assert_eq!(rf.status, 1001);
    assert_eq!(config.status, 1001);
    assert!(rf.trail.is_empty());
    assert_eq!(network.request_count().await, 0);
}

#[tokio::test]
async fn test_read_config_of_obfuscating_coordinator() {
    let (_network, service) = setup(NetworkSpec::default().with_dpa_version(0x0302).with_rf_band(0b10));

    let result = service
        .execute(OperationRequest::new(NetworkOperation::ReadConfig {
            device_addr: 0,
            hwpid: 0xFFFF,
        }))
        .await;

    assert_eq!(result.status, 0, "{}", result.status_str);
    let Some(OperationSummary::ReadConfig(config)) = result.summary else {
        panic!("expected a configuration");
    };
    assert_eq!(config.device_addr, 0);
    assert_eq!(config.rf_channel_a, 52);
    assert_eq!(config.tx_power, 7);
    assert_eq!(config.uart_baudrate, 9600);
    assert!(config.emb_pers.coordinator);
    assert_eq!(config.never_sleep, None);
    assert_eq!(config.rf_band, "433");
    assert_eq!(result.trail.len(), 1);
}

#[tokio::test]
async fn test_read_config_of_bonded_node() {
    let (network, service) = setup(small_network());

    let result = service
        .execute(OperationRequest::new(NetworkOperation::ReadConfig {
            device_addr: 5,
            hwpid: 0xFFFF,
        }))
        .await;

    assert_eq!(result.status, 0, "{}", result.status_str);
    let requests = network.requests().await;
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[1].nadr, 5);
    assert_eq!((requests[1].pnum, requests[1].pcmd), (pnum::OS, cmd::os::READ_CFG));
}

#[tokio::test]
async fn test_read_config_of_unbonded_node() {
    let (_network, service) = setup(small_network());

    let result = service
        .execute(OperationRequest::new(NetworkOperation::ReadConfig {
            device_addr: 7,
            hwpid: 0xFFFF,
        }))
        .await;

    assert_eq!(result.status, 1000);
    assert_eq!(result.status_str, "Node not bonded.");
    assert_eq!(result.trail.len(), 1);
}

#[tokio::test]
async fn test_read_config_device_error_keeps_code() {
    let (network, service) = setup(small_network());
    network.reject_command(pnum::OS, cmd::os::READ_CFG, 7).await;

    let result = service
        .execute(OperationRequest::new(NetworkOperation::ReadConfig {
            device_addr: 0,
            hwpid: 0xFFFF,
        }))
        .await;

    assert_eq!(result.status, 7);
    // device errors are not retried
    assert_eq!(result.trail.len(), 1);
    assert_eq!(result.trail[0].error_code, ErrorCode::Dpa(7));
}

fn restore(device_addr: u16, blocks: usize, dpa_version: u16) -> OperationRequest {
    OperationRequest::new(NetworkOperation::Restore(RestoreParams {
        device_addr,
        backup: hex::encode(vec![0x5A; 49 * blocks]),
        dpa_version,
        restart_coordinator: true,
    }))
}

#[tokio::test]
async fn test_restore_coordinator() {
    let (network, service) = setup(NetworkSpec::default());

    let result = service.execute(restore(0, 2, 0x0414)).await;

    assert_eq!(result.status, 0, "{}", result.status_str);
    assert_eq!(network.restored_blocks().await.len(), 2);
    assert_eq!(network.reset_count().await, 1);
    // peripheral check, OS read, two blocks, reset
    assert_eq!(result.trail.len(), 5);
    assert_eq!(
        result.summary,
        Some(OperationSummary::Restore {
            device_addr: 0,
            blocks_written: 2,
            restarted: true
        })
    );
}

#[tokio::test]
async fn test_restore_rejects_other_dpa_version() {
    let (network, service) = setup(NetworkSpec::default());

    let result = service.execute(restore(0, 1, 0x0300)).await;

    assert_eq!(result.status, 1000);
    assert_eq!(result.status_str, "DPA version doesn't match.");
    assert!(network.restored_blocks().await.is_empty());
}

#[tokio::test]
async fn test_restore_needs_coordinator_peripheral() {
    let (network, service) = setup(NetworkSpec::default().with_embedded_peripherals(0b1111_1100));

    let result = service.execute(restore(0, 1, 0x0414)).await;

    assert_eq!(result.status, 1000);
    assert_eq!(result.status_str, "Coordinator peripheral NOT found.");
    assert_eq!(network.request_count().await, 1);
}

#[tokio::test]
async fn test_restore_of_node_is_refused() {
    let (network, service) = setup(small_network());

    let result = service.execute(restore(1, 1, 0x0414)).await;

    assert_eq!(result.status, 1000);
    assert_eq!(
        result.status_str,
        "Restore function of [N] device is currently not supported."
    );
    assert_eq!(network.request_count().await, 0);
}

#[tokio::test]
async fn test_verbose_result_json() {
    let (_network, service) = setup(small_network());

    let quiet = service.execute(ping().with_msg_id("m-1")).await;
    let verbose = service.execute(ping().verbose()).await;

    let quiet = quiet.to_json().unwrap();
    assert_eq!(quiet["operation"], "ping");
    assert_eq!(quiet["msgId"], "m-1");
    assert_eq!(quiet["statusStr"], "ok");
    assert_eq!(quiet["perNodeResults"]["1"]["responded"], true);
    assert_eq!(quiet["summary"]["ping"]["inaccessibleNodesNr"], 1);
    assert!(quiet.get("trail").is_none());

    let verbose = verbose.to_json().unwrap();
    let trail = verbose["trail"].as_array().unwrap();
    assert_eq!(trail.len(), 4);
    assert_eq!(trail[0]["request"], "00.00.00.02.ff.ff");
    assert!(trail[0]["responseTs"].as_str().unwrap().ends_with('Z'));
    assert_eq!(trail[0]["confirmation"], "");
}
