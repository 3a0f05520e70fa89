#![cfg(unix)]

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{SAFARI, Unreachable, catalog, host, simulator};
use mdrive::{
	ApplicationResolver, CapabilityNegotiator, DRIVER_LOG, DevicePool, DriverTemplate, Error, ProcessDriverFactory, RetryPolicy, SessionOrchestrator,
	SessionState,
};
use mdrive_protocol::Capabilities;

fn orchestrator(pool: DevicePool, script: &str, base: Duration) -> SessionOrchestrator {
	let template = DriverTemplate::new("sh", "^READY$")
		.with_args(["-c", script])
		.with_env("MDRIVE_DEVICE", "{device}")
		.with_crash_pattern("crashed");
	SessionOrchestrator::new(
		CapabilityNegotiator::new(host()),
		pool,
		ApplicationResolver::new(Arc::new(Unreachable), catalog()),
		Arc::new(ProcessDriverFactory::new(template)),
	)
	.with_policy(RetryPolicy::new(base))
}

fn safari() -> Capabilities {
	Capabilities {
		bundle_id: Some(SAFARI.into()),
		..Default::default()
	}
}

#[tokio::test]
async fn driver_output_reaches_the_session_logs() {
	let pool = DevicePool::new([simulator("sim-1")]);
	let orchestrator = orchestrator(pool.clone(), "echo \"booting $MDRIVE_DEVICE\"; echo READY; exec sleep 30", Duration::from_secs(5));

	let id = orchestrator.create_session(safari()).await.unwrap();
	let session = orchestrator.registry().get(&id).unwrap();
	assert_eq!(session.state(), SessionState::Running);

	let lines: Vec<_> = session.logs().entries(DRIVER_LOG).into_iter().map(|entry| entry.message).collect();
	assert!(lines.contains(&"booting sim-1".to_string()), "{lines:?}");

	orchestrator.registry().remove_and_stop(&id).await.unwrap();
	assert_eq!(pool.free_count(), 1);
}

#[tokio::test]
async fn silent_driver_times_out_three_times() {
	let pool = DevicePool::new([simulator("sim-1")]);
	let orchestrator = orchestrator(pool.clone(), "exec sleep 30", Duration::from_millis(100));

	let err = orchestrator.create_session(safari()).await.unwrap_err();
	let Error::RetriesExhausted { attempts, final_timeout, .. } = err.cause() else {
		panic!("unexpected error: {err}");
	};
	assert_eq!(*attempts, 3);
	assert_eq!(*final_timeout, Duration::from_millis(300));
	assert_eq!(pool.free_count(), 1);
}

#[tokio::test]
async fn crash_line_after_ready_stops_the_session() {
	let pool = DevicePool::new([simulator("sim-1")]);
	let orchestrator = orchestrator(pool.clone(), "echo READY; sleep 0.3; echo 'application crashed'; exec sleep 30", Duration::from_secs(5));

	let id = orchestrator.create_session(safari()).await.unwrap();
	let session = orchestrator.registry().get(&id).unwrap();

	for _ in 0..200 {
		if session.is_stopped() {
			break;
		}
		tokio::time::sleep(Duration::from_millis(10)).await;
	}
	assert!(session.is_stopped());
	assert_eq!(session.crash_details().unwrap().summary(), "application crashed");
	assert_eq!(pool.free_count(), 1);
}

#[tokio::test]
async fn crash_line_before_ready_is_retried_then_reported() {
	let pool = DevicePool::new([simulator("sim-1")]);
	let orchestrator = orchestrator(pool.clone(), "echo 'application crashed'; exec sleep 30", Duration::from_secs(5));

	let err = orchestrator.create_session(safari()).await.unwrap_err();
	let Error::RetriesExhausted { last, .. } = err.cause() else {
		panic!("unexpected error: {err}");
	};
	assert!(matches!(last.as_deref(), Some(Error::CrashedAtStartup { .. })));
	assert_eq!(pool.free_count(), 1);
}
