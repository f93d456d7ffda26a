//! Transaction Executor Tests
//!
//! Tests the retry policy of the executor including:
//! - Transport failures retried up to the repeat count
//! - Device errors treated as terminal
//! - Every attempt recorded in the trail
//! - Timeout selection

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use iqmesh_dpa::{
    cmd, pnum, CoordinatorParameters, DpaChannel, DpaConfig, DpaError, DpaRequest, DpaResponse,
    DpaTransactionExecutor, DpaTransactionResult, ErrorCode, FrcResponseTime, TransactionFailure,
    TransactionTrail,
};
use parking_lot::Mutex;

enum Reply {
    Fail(TransactionFailure),
    Code(u8),
    Ok(Vec<u8>),
    Garbage,
}

/// Channel that answers from a script and remembers the timeouts it saw.
struct ScriptedChannel {
    replies: Mutex<VecDeque<Reply>>,
    timeouts: Mutex<Vec<Duration>>,
}

impl ScriptedChannel {
    fn new(replies: Vec<Reply>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            timeouts: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl DpaChannel for ScriptedChannel {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn execute(&self, request: &DpaRequest, timeout: Duration) -> DpaTransactionResult {
        self.timeouts.lock().push(timeout);
        let started = DpaTransactionResult::started(request);
        match self.replies.lock().pop_front() {
            Some(Reply::Fail(failure)) => started.failed(failure),
            Some(Reply::Code(code)) => {
                started.with_response(DpaResponse::with_code(request, code, vec![]).to_bytes())
            }
            Some(Reply::Ok(pdata)) => {
                started.with_response(DpaResponse::ok(request, pdata).to_bytes())
            }
            Some(Reply::Garbage) => started.with_response(vec![0x00, 0x01]),
            None => started.failed(TransactionFailure::Timeout),
        }
    }

    fn coordinator_parameters(&self) -> CoordinatorParameters {
        CoordinatorParameters {
            dpa_version: 0x0414,
            os_version: 0x43,
            os_build: 0x08B8,
        }
    }
}

fn executor(channel: Arc<ScriptedChannel>) -> DpaTransactionExecutor {
    DpaTransactionExecutor::new(channel, DpaConfig::default().with_retry_delay_ms(0))
}

fn bonded_request() -> DpaRequest {
    DpaRequest::coordinator(pnum::COORDINATOR, cmd::coordinator::BONDED_DEVICES)
}

#[tokio::test]
async fn test_success_after_transient_timeout() {
    let channel = ScriptedChannel::new(vec![
        Reply::Fail(TransactionFailure::Timeout),
        Reply::Ok(vec![0b0010_0110]),
    ]);
    let executor = executor(channel);
    let mut trail = TransactionTrail::new();

    let response = executor
        .execute_repeat(&bonded_request(), 2, None, &mut trail)
        .await
        .unwrap();

    assert_eq!(response.pdata, vec![0b0010_0110]);
    assert_eq!(trail.len(), 2);
    assert_eq!(
        trail.entries()[0].error_code,
        ErrorCode::Transaction(TransactionFailure::Timeout)
    );
    assert_eq!(trail.entries()[1].error_code, ErrorCode::Ok);
}

#[tokio::test]
async fn test_transport_failure_exhausts_repeat() {
    let channel = ScriptedChannel::new(vec![]);
    let executor = executor(channel);
    let mut trail = TransactionTrail::new();

    let err = executor
        .execute_repeat(&bonded_request(), 2, None, &mut trail)
        .await
        .unwrap_err();

    assert!(matches!(err, DpaError::Transaction(TransactionFailure::Timeout)));
    assert_eq!(err.protocol_code(), Some(-1));
    assert_eq!(trail.len(), 3);
}

#[tokio::test]
async fn test_dpa_error_is_terminal() {
    let channel = ScriptedChannel::new(vec![Reply::Code(3), Reply::Ok(vec![])]);
    let executor = executor(channel);
    let mut trail = TransactionTrail::new();

    let err = executor
        .execute_repeat(&bonded_request(), 5, None, &mut trail)
        .await
        .unwrap_err();

    assert_eq!(err.protocol_code(), Some(3));
    assert!(err.to_string().contains("ERROR_PNUM"));
    assert_eq!(trail.len(), 1);
    assert_eq!(trail.entries()[0].error_code, ErrorCode::Dpa(3));
}

#[tokio::test]
async fn test_bad_request_is_terminal() {
    let channel = ScriptedChannel::new(vec![
        Reply::Fail(TransactionFailure::BadRequest),
        Reply::Ok(vec![1]),
    ]);
    let executor = executor(channel);
    let mut trail = TransactionTrail::new();

    let err = executor
        .execute_repeat(&bonded_request(), 3, None, &mut trail)
        .await
        .unwrap_err();

    assert!(matches!(err, DpaError::Transaction(TransactionFailure::BadRequest)));
    assert_eq!(err.protocol_code(), Some(-7));
    assert_eq!(trail.len(), 1);
}

#[tokio::test]
async fn test_unparseable_response_is_retried() {
    let channel = ScriptedChannel::new(vec![Reply::Garbage, Reply::Ok(vec![1])]);
    let executor = executor(channel);
    let mut trail = TransactionTrail::new();

    executor
        .execute_repeat(&bonded_request(), 1, None, &mut trail)
        .await
        .unwrap();

    assert_eq!(
        trail.entries()[0].error_code,
        ErrorCode::Transaction(TransactionFailure::BadResponse)
    );
    assert_eq!(trail.len(), 2);
}

#[tokio::test]
async fn test_oversized_request_sends_nothing() {
    let channel = ScriptedChannel::new(vec![Reply::Ok(vec![])]);
    let executor = executor(Arc::clone(&channel));
    let mut trail = TransactionTrail::new();
    let request = bonded_request().with_pdata(vec![0; 60]);

    let err = executor
        .execute_repeat(&request, 1, None, &mut trail)
        .await
        .unwrap_err();

    assert!(matches!(err, DpaError::InvalidRequest(_)));
    assert!(trail.is_empty());
    assert!(channel.timeouts.lock().is_empty());
}

#[tokio::test]
async fn test_timeout_selection() {
    let channel = ScriptedChannel::new(vec![Reply::Ok(vec![]), Reply::Ok(vec![]), Reply::Ok(vec![])]);
    let executor = executor(Arc::clone(&channel));
    let mut trail = TransactionTrail::new();

    let frc = DpaRequest::coordinator(pnum::FRC, cmd::frc::SEND).with_pdata(vec![0, 0, 0]);
    executor.set_frc_response_time(FrcResponseTime::Ms360);
    executor.execute_repeat(&frc, 0, None, &mut trail).await.unwrap();

    let node = DpaRequest::new(5u8, pnum::OS, cmd::os::READ);
    executor.execute_repeat(&node, 0, None, &mut trail).await.unwrap();

    executor
        .execute_repeat(&node, 0, Some(Duration::from_millis(460)), &mut trail)
        .await
        .unwrap();

    let timeouts = channel.timeouts.lock().clone();
    assert_eq!(timeouts[0], Duration::from_millis(2000 + 360));
    assert_eq!(timeouts[1], Duration::from_millis(2000));
    assert_eq!(timeouts[2], Duration::from_millis(460));
}

#[tokio::test]
async fn test_set_frc_response_time_returns_previous() {
    let executor = executor(ScriptedChannel::new(vec![]));

    let previous = executor.set_frc_response_time(FrcResponseTime::Ms2600);
    assert_eq!(previous, FrcResponseTime::Ms40);
    assert_eq!(
        executor.set_frc_response_time(previous),
        FrcResponseTime::Ms2600
    );
}
