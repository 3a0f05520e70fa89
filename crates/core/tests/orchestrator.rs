mod common;

use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use common::{Behavior, FixedArtifact, SAFARI, ScriptedDrivers, iphone, orchestrator, orchestrator_with, simulator};
use mdrive::{DevicePool, Error, FsMaterializer, SessionState};
use mdrive_protocol::{Capabilities, DeviceVariation};

fn safari() -> Capabilities {
	Capabilities {
		bundle_id: Some(SAFARI.into()),
		..Default::default()
	}
}

fn ms(millis: u64) -> Duration {
	Duration::from_millis(millis)
}

fn zipped_bundle(path: &Path) {
	let mut zip = zip::ZipWriter::new(std::fs::File::create(path).unwrap());
	let options = zip::write::SimpleFileOptions::default();
	zip.add_directory("UICatalog.app", options).unwrap();
	zip.add_directory("UICatalog.app/en.lproj", options).unwrap();
	zip.start_file("UICatalog.app/Info.plist", options).unwrap();
	zip.write_all(b"plist").unwrap();
	zip.finish().unwrap();
}

fn entries(dir: &Path) -> usize {
	std::fs::read_dir(dir).map(|entries| entries.count()).unwrap_or(0)
}

async fn wait_until(mut done: impl FnMut() -> bool) {
	for _ in 0..200 {
		if done() {
			return;
		}
		tokio::time::sleep(ms(5)).await;
	}
	panic!("condition not reached");
}

#[tokio::test]
async fn success_holds_exactly_one_device() {
	let pool = DevicePool::new([iphone("udid-1"), simulator("sim-1")]);
	let drivers = ScriptedDrivers::always(Behavior::Ready);
	let orchestrator = orchestrator(pool.clone(), Arc::clone(&drivers));

	let id = orchestrator.create_session(safari()).await.unwrap();

	assert_eq!(pool.free_count(), 1);
	assert_eq!(drivers.log.timeouts(), [ms(50)]);
	assert_eq!(drivers.log.running(), 1);

	let session = orchestrator.registry().get(&id).unwrap();
	assert_eq!(session.state(), SessionState::Running);
	assert_eq!(session.device().unwrap().id().as_str(), "udid-1");

	let caps = session.capabilities();
	assert_eq!(caps.language.as_deref(), Some("en"));
	assert_eq!(caps.locale.as_deref(), Some("en_GB"));
	assert_eq!(caps.sdk_version.as_deref(), Some("7.1"));
	assert_eq!(caps.variation, Some(DeviceVariation::Retina4));
	assert_eq!(caps.bundle_id.as_deref(), Some(SAFARI));
}

#[tokio::test]
async fn permanent_timeouts_make_exactly_three_escalating_attempts() {
	let pool = DevicePool::new([simulator("sim-1")]);
	let drivers = ScriptedDrivers::always(Behavior::Timeout);
	let orchestrator = orchestrator(pool.clone(), Arc::clone(&drivers));

	let err = orchestrator.create_session(safari()).await.unwrap_err();

	assert_eq!(drivers.log.timeouts(), [ms(50), ms(100), ms(150)]);
	assert_eq!(drivers.log.created(), 3);
	assert_eq!(pool.free_count(), 1);
	assert_eq!(drivers.log.running(), 0);
	assert!(orchestrator.registry().is_empty());

	let Error::RetriesExhausted { attempts, final_timeout, last } = err.cause() else {
		panic!("unexpected error: {err}");
	};
	assert_eq!(*attempts, 3);
	assert_eq!(*final_timeout, ms(150));
	assert!(matches!(last.as_deref(), Some(Error::DriverStartTimeout { timeout }) if *timeout == ms(150)));
	assert!(err.to_string().starts_with("session not created: "));
}

#[tokio::test]
async fn a_timeout_is_retried_with_a_larger_budget() {
	let pool = DevicePool::new([simulator("sim-1")]);
	let drivers = ScriptedDrivers::new([Behavior::Timeout, Behavior::Ready]);
	let orchestrator = orchestrator(pool.clone(), Arc::clone(&drivers));

	orchestrator.create_session(safari()).await.unwrap();

	assert_eq!(drivers.log.timeouts(), [ms(50), ms(100)]);
	assert_eq!(pool.free_count(), 0);
	assert_eq!(orchestrator.registry().len(), 1);
}

#[tokio::test]
async fn crash_at_startup_is_retried() {
	let pool = DevicePool::new([simulator("sim-1")]);
	let drivers = ScriptedDrivers::new([Behavior::CrashOnStart, Behavior::Ready]);
	let orchestrator = orchestrator(pool.clone(), Arc::clone(&drivers));

	let id = orchestrator.create_session(safari()).await.unwrap();

	assert_eq!(drivers.log.timeouts().len(), 2);
	assert_eq!(drivers.log.running(), 1);
	assert_eq!(pool.free_count(), 0);
	let session = orchestrator.registry().get(&id).unwrap();
	assert!(!session.is_crashed());
}

#[tokio::test]
async fn repeated_crashes_exhaust_attempts_and_keep_the_last_cause() {
	let pool = DevicePool::new([simulator("sim-1")]);
	let drivers = ScriptedDrivers::always(Behavior::CrashAfterReady);
	let orchestrator = orchestrator(pool.clone(), Arc::clone(&drivers));

	let err = orchestrator.create_session(safari()).await.unwrap_err();

	let Error::RetriesExhausted { attempts, last, .. } = err.cause() else {
		panic!("unexpected error: {err}");
	};
	assert_eq!(*attempts, 3);
	let Some(Error::CrashedAtStartup { details }) = last.as_deref() else {
		panic!("unexpected last cause: {last:?}");
	};
	assert_eq!(details.summary(), "EXC_BAD_ACCESS");
	assert_eq!(pool.free_count(), 1);
	assert_eq!(drivers.log.running(), 0);
}

#[tokio::test]
async fn unclassified_start_failure_is_fatal() {
	let pool = DevicePool::new([simulator("sim-1")]);
	let drivers = ScriptedDrivers::always(Behavior::Exit);
	let orchestrator = orchestrator(pool.clone(), Arc::clone(&drivers));

	let err = orchestrator.create_session(safari()).await.unwrap_err();

	assert!(matches!(err.cause(), Error::Driver(_)));
	assert_eq!(drivers.log.timeouts().len(), 1);
	assert_eq!(pool.free_count(), 1);
}

#[tokio::test]
async fn validation_failure_reserves_nothing() {
	let pool = DevicePool::new([simulator("sim-1")]);
	let drivers = ScriptedDrivers::always(Behavior::Ready);
	let orchestrator = orchestrator(pool.clone(), Arc::clone(&drivers));

	let caps = Capabilities {
		language: Some("xx-not-real".into()),
		..safari()
	};
	let err = orchestrator.create_session(caps).await.unwrap_err();

	assert!(matches!(err.cause(), Error::UnsupportedLanguage(_)));
	assert_eq!(drivers.log.created(), 0);
	assert!(drivers.log.timeouts().is_empty());
	assert_eq!(pool.free_count(), 1);
}

#[tokio::test]
async fn uninstalled_sdk_is_rejected() {
	let pool = DevicePool::new([simulator("sim-1")]);
	let drivers = ScriptedDrivers::always(Behavior::Ready);
	let orchestrator = orchestrator(pool.clone(), Arc::clone(&drivers));

	let caps = Capabilities {
		sdk_version: Some("6.0".into()),
		..safari()
	};
	let err = orchestrator.create_session(caps).await.unwrap_err();
	assert!(matches!(err.cause(), Error::SdkNotInstalled { .. }));
	assert_eq!(drivers.log.created(), 0);
}

#[tokio::test]
async fn no_matching_device_is_not_retried() {
	let pool = DevicePool::new([iphone("udid-1")]);
	let drivers = ScriptedDrivers::always(Behavior::Ready);
	let orchestrator = orchestrator(pool.clone(), Arc::clone(&drivers));

	let caps = Capabilities {
		sdk_version: Some("6.1".into()),
		..safari()
	};
	let err = orchestrator.create_session(caps).await.unwrap_err();

	assert!(matches!(err.cause(), Error::NoMatchingDevice(_)));
	assert_eq!(drivers.log.created(), 0);
	assert_eq!(pool.free_count(), 1);
}

#[tokio::test]
async fn missing_application_releases_the_device() {
	let pool = DevicePool::new([simulator("sim-1")]);
	let drivers = ScriptedDrivers::always(Behavior::Ready);
	let orchestrator = orchestrator(pool.clone(), Arc::clone(&drivers));

	let caps = Capabilities {
		bundle_id: Some("com.example.missing".into()),
		..Default::default()
	};
	let err = orchestrator.create_session(caps).await.unwrap_err();

	assert!(matches!(err.cause(), Error::NoMatchingApplication { .. }));
	assert_eq!(drivers.log.created(), 0);
	assert_eq!(pool.free_count(), 1);
}

#[tokio::test]
async fn unfetchable_application_is_fatal_and_releases_the_device() {
	let pool = DevicePool::new([simulator("sim-1")]);
	let drivers = ScriptedDrivers::always(Behavior::Ready);
	let orchestrator = orchestrator(pool.clone(), Arc::clone(&drivers));

	let caps = Capabilities {
		app: Some("http://builds.local/UICatalog.zip".into()),
		..Default::default()
	};
	let err = orchestrator.create_session(caps).await.unwrap_err();

	assert!(matches!(err.cause(), Error::ApplicationResolutionFailed { location, .. } if location == "http://builds.local/UICatalog.zip"));
	assert_eq!(pool.free_count(), 1);
}

#[tokio::test]
async fn bundle_application_moves_the_session_to_a_simulator() {
	let dir = tempfile::TempDir::new().unwrap();
	let bundle = dir.path().join("UICatalog.app");
	std::fs::create_dir_all(bundle.join("en.lproj")).unwrap();

	let pool = DevicePool::new([iphone("udid-1"), simulator("sim-1")]);
	let drivers = ScriptedDrivers::always(Behavior::Ready);
	let orchestrator = orchestrator_with(pool.clone(), Arc::clone(&drivers), Arc::new(FixedArtifact(bundle)));

	let caps = Capabilities {
		app: Some("/builds/UICatalog.zip".into()),
		..Default::default()
	};
	let id = orchestrator.create_session(caps).await.unwrap();

	let session = orchestrator.registry().get(&id).unwrap();
	assert_eq!(session.device().unwrap().id().as_str(), "sim-1");
	assert_eq!(session.capabilities().simulator, Some(true));
	assert_eq!(session.capabilities().bundle_id.as_deref(), Some("UICatalog"));
	assert_eq!(session.application().unwrap().language(), "en");
	assert!(!pool.is_reserved(&mdrive::DeviceId::new("udid-1")));
	assert_eq!(pool.free_count(), 1);
}

#[tokio::test]
async fn bundle_application_without_simulator_fails_cleanly() {
	let dir = tempfile::TempDir::new().unwrap();
	let bundle = dir.path().join("UICatalog.app");
	std::fs::create_dir_all(&bundle).unwrap();

	let pool = DevicePool::new([iphone("udid-1")]);
	let drivers = ScriptedDrivers::always(Behavior::Ready);
	let orchestrator = orchestrator_with(pool.clone(), Arc::clone(&drivers), Arc::new(FixedArtifact(bundle)));

	let caps = Capabilities {
		app: Some("/builds/UICatalog.zip".into()),
		..Default::default()
	};
	let err = orchestrator.create_session(caps).await.unwrap_err();

	assert!(matches!(err.cause(), Error::NoMatchingDevice(_)));
	assert_eq!(pool.free_count(), 1);
}

#[tokio::test]
async fn bad_logging_preferences_fail_before_reserving() {
	let pool = DevicePool::new([simulator("sim-1")]);
	let drivers = ScriptedDrivers::always(Behavior::Ready);
	let orchestrator = orchestrator(pool.clone(), Arc::clone(&drivers));

	let caps = Capabilities {
		logging_prefs: Some(BTreeMap::from([("driver".to_string(), "LOUD".to_string())])),
		..safari()
	};
	let err = orchestrator.create_session(caps).await.unwrap_err();

	assert!(matches!(err.cause(), Error::LogManagerCreationFailed(_)));
	assert_eq!(pool.free_count(), 1);
	assert_eq!(drivers.log.created(), 0);
}

#[tokio::test]
async fn crash_after_creation_stops_the_session() {
	let pool = DevicePool::new([simulator("sim-1")]);
	let drivers = ScriptedDrivers::always(Behavior::Ready);
	let orchestrator = orchestrator(pool.clone(), Arc::clone(&drivers));

	let id = orchestrator.create_session(safari()).await.unwrap();
	let session = orchestrator.registry().get(&id).unwrap();
	session.crash_reporter().report("Application crashed\nTermination reason: SIGKILL");

	assert!(session.is_crashed());
	wait_until(|| session.is_stopped()).await;
	assert_eq!(session.state(), SessionState::Stopped);
	assert_eq!(session.crash_details().unwrap().summary(), "Termination reason: SIGKILL");
	assert_eq!(pool.free_count(), 1);
	assert_eq!(drivers.log.running(), 0);
}

#[tokio::test]
async fn deleting_twice_is_harmless() {
	let pool = DevicePool::new([simulator("sim-1")]);
	let drivers = ScriptedDrivers::always(Behavior::Ready);
	let orchestrator = orchestrator(pool.clone(), Arc::clone(&drivers));

	let id = orchestrator.create_session(safari()).await.unwrap();
	let session = orchestrator.registry().remove_and_stop(&id).await.unwrap();
	session.stop().await;

	assert_eq!(pool.free_count(), 1);
	assert_eq!(drivers.log.stops.load(std::sync::atomic::Ordering::SeqCst), 1);
	assert!(matches!(orchestrator.registry().remove_and_stop(&id).await, Err(Error::NoSuchSession(_))));
}

#[tokio::test]
async fn concurrent_requests_never_share_a_device() {
	let pool = DevicePool::new([simulator("sim-1"), simulator("sim-2")]);
	let drivers = ScriptedDrivers::always(Behavior::Ready);
	let orchestrator = orchestrator(pool.clone(), Arc::clone(&drivers));

	let (a, b, c) = tokio::join!(
		orchestrator.create_session(safari()),
		orchestrator.create_session(safari()),
		orchestrator.create_session(safari()),
	);
	let results = [a, b, c];
	let created: Vec<_> = results.iter().filter_map(|result| result.as_ref().ok()).collect();
	assert_eq!(created.len(), 2);
	assert!(
		results
			.iter()
			.filter_map(|result| result.as_ref().err())
			.all(|err| matches!(err.cause(), Error::NoMatchingDevice(_)))
	);

	let devices: Vec<_> = created
		.iter()
		.map(|id| orchestrator.registry().get(id).unwrap().device().unwrap().id().clone())
		.collect();
	assert_ne!(devices[0], devices[1]);
	assert_eq!(pool.free_count(), 0);

	assert_eq!(orchestrator.registry().stop_all().await, 2);
	assert_eq!(pool.free_count(), 2);
}

#[tokio::test]
async fn failed_attempts_leave_no_extracted_applications() {
	let dir = tempfile::TempDir::new().unwrap();
	let archive = dir.path().join("UICatalog.zip");
	zipped_bundle(&archive);
	let work = dir.path().join("work");

	let pool = DevicePool::new([simulator("sim-1")]);
	let drivers = ScriptedDrivers::always(Behavior::Timeout);
	let orchestrator = orchestrator_with(pool.clone(), Arc::clone(&drivers), Arc::new(FsMaterializer::new(&work)));

	let caps = Capabilities {
		app: Some(archive.to_str().unwrap().into()),
		..Default::default()
	};
	let err = orchestrator.create_session(caps).await.unwrap_err();

	assert!(matches!(err.cause(), Error::RetriesExhausted { attempts: 3, .. }));
	assert_eq!(drivers.log.created(), 3);
	assert_eq!(entries(&work), 0);
	assert_eq!(pool.free_count(), 1);
}

#[tokio::test]
async fn stopping_a_session_removes_its_extracted_application() {
	let dir = tempfile::TempDir::new().unwrap();
	let archive = dir.path().join("UICatalog.zip");
	zipped_bundle(&archive);
	let work = dir.path().join("work");

	let pool = DevicePool::new([simulator("sim-1")]);
	let drivers = ScriptedDrivers::new([Behavior::Timeout, Behavior::Ready]);
	let orchestrator = orchestrator_with(pool.clone(), Arc::clone(&drivers), Arc::new(FsMaterializer::new(&work)));

	let caps = Capabilities {
		app: Some(archive.to_str().unwrap().into()),
		..Default::default()
	};
	let id = orchestrator.create_session(caps).await.unwrap();

	let session = orchestrator.registry().get(&id).unwrap();
	assert!(session.application().unwrap().path().starts_with(&work));
	assert!(session.application().unwrap().path().join("Info.plist").is_file());
	assert_eq!(entries(&work), 1);

	orchestrator.registry().remove_and_stop(&id).await.unwrap();
	assert_eq!(entries(&work), 0);
	assert!(archive.is_file());
}
