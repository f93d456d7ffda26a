//! Channel Arbitration Tests
//!
//! Tests exclusive access including:
//! - Mutual exclusion under concurrent acquisition
//! - Service-mode holders blocking orchestrations
//! - Shared traffic refused while the channel is held

use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use async_trait::async_trait;
use iqmesh_dpa::{
    cmd, pnum, ChannelArbiter, CoordinatorParameters, DpaChannel, DpaConfig, DpaError, DpaRequest,
    DpaResponse, DpaService, DpaTransactionResult, TransactionFailure, TransactionTrail,
};

struct EchoChannel;

#[async_trait]
impl DpaChannel for EchoChannel {
    fn name(&self) -> &str {
        "echo"
    }

    async fn execute(&self, request: &DpaRequest, _timeout: Duration) -> DpaTransactionResult {
        DpaTransactionResult::started(request)
            .with_response(DpaResponse::ok(request, vec![]).to_bytes())
    }

    fn coordinator_parameters(&self) -> CoordinatorParameters {
        CoordinatorParameters {
            dpa_version: 0x0414,
            os_version: 0x43,
            os_build: 0x08B8,
        }
    }
}

#[test]
fn test_concurrent_exclusive_exactly_one_wins() {
    let arbiter = ChannelArbiter::new();
    let barrier = Arc::new(Barrier::new(8));

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let arbiter = arbiter.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                arbiter.acquire_exclusive(format!("op-{}", i))
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let granted = results.iter().filter(|r| r.is_ok()).count();
    let busy = results
        .iter()
        .filter(|r| matches!(r, Err(DpaError::ResourceBusy(_))))
        .count();

    assert_eq!(granted, 1);
    assert_eq!(busy, 7);

    drop(results);
    assert!(arbiter.acquire_exclusive("after").is_ok());
}

#[tokio::test]
async fn test_service_mode_blocks_orchestrations() {
    let service = DpaService::new(Arc::new(EchoChannel), DpaConfig::default());

    let ide = service.enter_service_mode("ide-counterpart").unwrap();
    let err = service.get_exclusive_access("ping").err().unwrap();
    assert!(err.to_string().contains("ide-counterpart"));

    drop(ide);
    assert!(service.get_exclusive_access("ping").is_ok());
}

#[tokio::test]
async fn test_shared_traffic_refused_during_exclusive_session() {
    let service = DpaService::new(Arc::new(EchoChannel), DpaConfig::default());
    let request = DpaRequest::coordinator(pnum::OS, cmd::os::READ);
    let mut trail = TransactionTrail::new();

    let mut session = service.get_exclusive_access("restore").unwrap();
    let err = service
        .execute_repeat(&request, 0, None, &mut trail)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        DpaError::Transaction(TransactionFailure::ExclusiveAccess)
    ));
    assert_eq!(err.protocol_code(), Some(-6));

    session
        .execute_repeat(&request, 0, None, &mut trail)
        .await
        .unwrap();
    session.release();

    assert!(!session.is_active());
    assert!(session
        .execute_repeat(&request, 0, None, &mut trail)
        .await
        .is_err());
    service
        .execute_repeat(&request, 0, None, &mut trail)
        .await
        .unwrap();
    assert_eq!(trail.len(), 2);
}
