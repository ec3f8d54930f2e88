//! Integration tests for the streaming session
//!
//! Drives full sessions against the scripted mock backend, covering:
//! - Failure at each acquisition step and what gets released
//! - Open/seize fallback and non-fatal degradations
//! - Streaming cadence and write failures
//! - Probe-only runs and probe writes

use common::{DeviceMatchCriteria, StatusCode};
use std::time::Duration;
use streamer::backend::BindError;
use streamer::config::StreamerConfig;
use streamer::error::{BindStage, SessionError};
use streamer::frame::FrameBuilder;
use streamer::session::{AcquisitionStep, OpenMode, SessionOutcome, SessionPlan, run_session};
use streamer::teardown::HandleKind;
use streamer::test_utils::{MockBackend, MockDevice, MockEvent, MockPipe, RecordingPacer};

fn plan(frame_count: u32) -> SessionPlan {
    let mut plan = StreamerConfig::default().to_plan().unwrap();
    plan.frame_count = frame_count;
    plan
}

fn run(backend: &MockBackend, plan: &SessionPlan) -> (SessionOutcome, RecordingPacer) {
    let mut pacer = RecordingPacer::default();
    let outcome = run_session(backend, plan, &mut pacer);
    (outcome, pacer)
}

mod acquisition_failures {
    use super::*;

    #[test]
    fn test_no_matching_device() {
        let backend = MockBackend::new(vec![MockDevice::default().with_ids(0x1234, 0x5678)]);
        let (outcome, _) = run(&backend, &plan(3));

        assert_eq!(
            outcome.error,
            Some(SessionError::DeviceNotFound {
                criteria: DeviceMatchCriteria::new(0x15e4, 0x0053),
                status: StatusCode::NOT_FOUND,
            })
        );
        assert_eq!(outcome.reached(), Some(AcquisitionStep::Match));
        assert_eq!(outcome.exit_code(), 1);
        assert_eq!(outcome.teardown.count(), 0);
        assert_eq!(backend.events(), vec![MockEvent::FindDevices]);
    }

    #[test]
    fn test_enumeration_failure_keeps_status() {
        let backend =
            MockBackend::new(vec![MockDevice::default()]).failing_find(StatusCode::NO_MEMORY);
        let (outcome, _) = run(&backend, &plan(3));

        assert_eq!(outcome.error.as_ref().map(SessionError::status), Some(StatusCode::NO_MEMORY));
        assert_eq!(outcome.last_status, StatusCode::NO_MEMORY);
        assert_eq!(backend.releases(), 0);
    }

    #[test]
    fn test_device_bind_failure_releases_service_only() {
        let device = MockDevice::default().failing_device_bind(BindError::query(StatusCode::ERROR));
        let backend = MockBackend::new(vec![device]);
        let (outcome, _) = run(&backend, &plan(3));

        assert_eq!(
            outcome.error,
            Some(SessionError::BindFailed {
                stage: BindStage::DeviceQuery,
                status: StatusCode::ERROR,
            })
        );
        assert_eq!(outcome.reached(), Some(AcquisitionStep::BindDeviceInterface));
        assert_eq!(outcome.exit_code(), 1);
        assert_eq!(backend.releases(), 1);
        assert_eq!(backend.count_events(&MockEvent::ReleaseService { service: 1 }), 1);
        assert_eq!(backend.count_events(&MockEvent::ReleaseDevice), 0);
    }

    #[test]
    fn test_open_and_seize_fail() {
        let device = MockDevice::default()
            .failing_open(StatusCode::EXCLUSIVE_ACCESS)
            .failing_seize(StatusCode::NOT_PERMITTED);
        let backend = MockBackend::new(vec![device]);
        let (outcome, _) = run(&backend, &plan(3));

        assert_eq!(
            outcome.error,
            Some(SessionError::OpenFailed {
                open_status: StatusCode::EXCLUSIVE_ACCESS,
                seize_status: StatusCode::NOT_PERMITTED,
            })
        );
        assert_eq!(outcome.last_status, StatusCode::NOT_PERMITTED);
        assert_eq!(outcome.open_mode, None);
        assert_eq!(backend.count_events(&MockEvent::Open), 1);
        assert_eq!(backend.count_events(&MockEvent::OpenSeize), 1);
        assert_eq!(backend.count_events(&MockEvent::CloseDevice), 0);
        assert_eq!(backend.count_events(&MockEvent::ReleaseDevice), 1);
        assert_eq!(outcome.teardown.count(), 1);
        assert_eq!(outcome.teardown.released[0].close_status, None);
    }

    #[test]
    fn test_interface_iterator_failure() {
        let device = MockDevice::default().failing_interface_iterator(StatusCode::UNSUPPORTED);
        let backend = MockBackend::new(vec![device]);
        let (outcome, _) = run(&backend, &plan(3));

        assert_eq!(
            outcome.error,
            Some(SessionError::NoInterfaceFound {
                status: StatusCode::UNSUPPORTED,
            })
        );
        assert_eq!(outcome.reached(), Some(AcquisitionStep::FindInterface));
        assert_eq!(backend.count_events(&MockEvent::CloseDevice), 1);
        assert_eq!(backend.count_events(&MockEvent::ReleaseDevice), 1);
    }

    #[test]
    fn test_device_without_interfaces() {
        let backend = MockBackend::new(vec![MockDevice::default().with_interfaces(0)]);
        let (outcome, _) = run(&backend, &plan(3));

        assert_eq!(
            outcome.error,
            Some(SessionError::NoInterfaceFound {
                status: StatusCode::NOT_FOUND,
            })
        );
        assert_eq!(outcome.exit_code(), 1);
        assert_eq!(outcome.teardown.count(), 1);
        assert_eq!(outcome.teardown.released[0].kind, HandleKind::DeviceInterface);
    }

    #[test]
    fn test_interface_bind_failure() {
        let device =
            MockDevice::default().failing_interface_bind(BindError::plugin(StatusCode::NO_MEMORY));
        let backend = MockBackend::new(vec![device]);
        let (outcome, _) = run(&backend, &plan(3));

        assert_eq!(
            outcome.error,
            Some(SessionError::BindFailed {
                stage: BindStage::InterfacePlugin,
                status: StatusCode::NO_MEMORY,
            })
        );
        assert_eq!(backend.count_events(&MockEvent::ReleaseInterface), 0);
        assert_eq!(backend.count_events(&MockEvent::ReleaseDevice), 1);
        // Device service and interface service.
        assert_eq!(backend.releases(), 3);
    }
}

mod acquisition_recovery {
    use super::*;

    #[test]
    fn test_seize_after_failed_open() {
        let device = MockDevice::default().failing_open(StatusCode::EXCLUSIVE_ACCESS);
        let backend = MockBackend::new(vec![device]);
        let (outcome, _) = run(&backend, &plan(3));

        assert_eq!(outcome.open_mode, Some(OpenMode::Seize));
        assert!(outcome.error.is_none());
        assert_eq!(outcome.stream.as_ref().map(|s| s.frames_sent()), Some(3));
        assert_eq!(backend.count_events(&MockEvent::CloseDevice), 1);
    }

    #[test]
    fn test_normal_open_does_not_seize() {
        let backend = MockBackend::new(vec![MockDevice::default()]);
        let (outcome, _) = run(&backend, &plan(1));

        assert_eq!(outcome.open_mode, Some(OpenMode::Normal));
        assert_eq!(backend.count_events(&MockEvent::OpenSeize), 0);
    }

    #[test]
    fn test_configuration_failure_is_degraded() {
        let device = MockDevice::default().failing_configuration(StatusCode::PIPE_STALLED);
        let backend = MockBackend::new(vec![device]);
        let (outcome, _) = run(&backend, &plan(2));

        assert_eq!(outcome.degradations.configure, Some(StatusCode::PIPE_STALLED));
        assert!(outcome.degradations.any());
        assert!(outcome.error.is_none());
        assert!(outcome.streamed());
        assert_eq!(outcome.exit_code(), 0);
    }

    #[test]
    fn test_interface_open_failure_is_degraded() {
        let device = MockDevice::default().failing_interface_open(StatusCode::EXCLUSIVE_ACCESS);
        let backend = MockBackend::new(vec![device]);
        let (outcome, pacer) = run(&backend, &plan(5));

        assert_eq!(
            outcome.degradations.open_interface,
            Some(StatusCode::EXCLUSIVE_ACCESS)
        );
        // Writes on an unopened interface fail, so the first frame aborts.
        assert_eq!(
            outcome.error,
            Some(SessionError::WriteFailed {
                pipe: 1,
                frame_index: 0,
                status: StatusCode::NOT_OPEN,
            })
        );
        assert!(pacer.pauses.is_empty());
        assert_eq!(outcome.exit_code(), 0);
        assert_eq!(backend.count_events(&MockEvent::CloseInterface), 1);
        assert_eq!(backend.count_events(&MockEvent::ReleaseInterface), 1);
    }

    #[test]
    fn test_first_of_several_matches_is_used() {
        let backend = MockBackend::new(vec![MockDevice::default(), MockDevice::default()]);
        let (outcome, _) = run(&backend, &plan(1));

        assert!(outcome.error.is_none());
        assert_eq!(backend.count_events(&MockEvent::BindDevice { service: 1 }), 1);
        assert_eq!(backend.count_events(&MockEvent::BindDevice { service: 2 }), 0);
        assert_eq!(backend.count_events(&MockEvent::ReleaseService { service: 2 }), 1);
    }

    #[test]
    fn test_extra_interfaces_are_released() {
        let backend = MockBackend::new(vec![MockDevice::default().with_interfaces(3)]);
        let (outcome, _) = run(&backend, &plan(1));

        assert!(outcome.error.is_none());
        assert_eq!(backend.count_events(&MockEvent::BindInterface { service: 2 }), 1);
        // Device service plus all three interface services.
        let service_releases = backend
            .events()
            .iter()
            .filter(|e| matches!(e, MockEvent::ReleaseService { .. }))
            .count();
        assert_eq!(service_releases, 4);
    }
}

mod streaming {
    use super::*;

    #[test]
    fn test_default_run() {
        let backend = MockBackend::new(vec![MockDevice::default()]);
        let plan = plan(200);
        let (outcome, pacer) = run(&backend, &plan);

        let report = outcome.stream.as_ref().unwrap();
        assert_eq!(report.frames_attempted, 200);
        assert_eq!(report.frames_sent(), 200);
        assert_eq!(pacer.pauses.len(), 200);
        assert_eq!(pacer.total(), Duration::from_secs(5));
        assert_eq!(backend.count_events(&MockEvent::WritePipe(1)), 200);
        assert_eq!(backend.last_payload().as_deref(), Some(plan.frame.as_bytes()));
        assert_eq!(outcome.last_status, StatusCode::SUCCESS);
        assert_eq!(outcome.exit_code(), 0);
    }

    #[test]
    fn test_single_marker_frame_is_sent_unmodified() {
        let backend = MockBackend::new(vec![MockDevice::default()]);
        let mut plan = plan(200);
        plan.frame = FrameBuilder::new(514, 0).with(0, 255).build();
        let (outcome, pacer) = run(&backend, &plan);

        let payload = backend.last_payload().unwrap();
        assert_eq!(payload.len(), 514);
        assert_eq!(payload[0], 255);
        assert!(payload[1..].iter().all(|&b| b == 0));
        assert_eq!(pacer.total(), Duration::from_secs(5));
        assert_eq!(outcome.exit_code(), 0);
    }

    #[test]
    fn test_full_event_sequence() {
        let backend = MockBackend::new(vec![MockDevice::default()]);
        let (outcome, _) = run(&backend, &plan(1));

        assert_eq!(outcome.reached(), Some(AcquisitionStep::OpenInterface));
        assert_eq!(
            backend.events(),
            vec![
                MockEvent::FindDevices,
                MockEvent::BindDevice { service: 1 },
                MockEvent::ReleaseService { service: 1 },
                MockEvent::Open,
                MockEvent::SetConfiguration(1),
                MockEvent::FindInterfaces,
                MockEvent::BindInterface { service: 2 },
                MockEvent::ReleaseService { service: 2 },
                MockEvent::OpenInterface,
                MockEvent::EndpointCount,
                MockEvent::PipeProperties(1),
                MockEvent::WritePipe(1),
                MockEvent::CloseInterface,
                MockEvent::ReleaseInterface,
                MockEvent::CloseDevice,
                MockEvent::ReleaseDevice,
            ]
        );
    }

    #[test]
    fn test_missing_pipe_aborts_on_first_frame() {
        let backend = MockBackend::new(vec![MockDevice::default()]);
        let mut plan = plan(200);
        plan.pipe = 2;
        let (outcome, pacer) = run(&backend, &plan);

        assert_eq!(
            outcome.error,
            Some(SessionError::WriteFailed {
                pipe: 2,
                frame_index: 0,
                status: StatusCode::BAD_ARGUMENT,
            })
        );
        assert_eq!(backend.count_events(&MockEvent::WritePipe(2)), 1);
        assert!(pacer.pauses.is_empty());
        assert_eq!(outcome.exit_code(), 0);
        assert_eq!(outcome.teardown.count(), 2);
    }

    #[test]
    fn test_later_failures_are_counted() {
        let device = MockDevice::default().failing_writes(vec![4, 9]);
        let backend = MockBackend::new(vec![device]);
        let (outcome, pacer) = run(&backend, &plan(10));

        let report = outcome.stream.as_ref().unwrap();
        assert_eq!(report.frames_attempted, 10);
        assert_eq!(report.frames_failed, 2);
        assert_eq!(report.last_status, StatusCode::IO_ERROR);
        assert!(outcome.error.is_none());
        assert_eq!(pacer.pauses.len(), 10);
    }

    #[test]
    fn test_pipe_resolution_is_reported() {
        let device = MockDevice::default()
            .with_pipes(vec![MockPipe::bulk_out(1), MockPipe::bulk_in(2)])
            .failing_pipe_query(2);
        let backend = MockBackend::new(vec![device]);
        let (outcome, _) = run(&backend, &plan(1));

        assert_eq!(outcome.pipes.len(), 2);
        assert!(outcome.pipes[0].result.is_ok());
        assert_eq!(outcome.pipes[1].result, Err(StatusCode::NOT_FOUND));
        assert!(outcome.error.is_none());
    }
}

mod probing {
    use super::*;

    #[test]
    fn test_probe_only_skips_streaming() {
        let backend = MockBackend::new(vec![MockDevice::default()]);
        let mut plan = plan(200);
        plan.probe_only = true;
        let (outcome, pacer) = run(&backend, &plan);

        assert!(!outcome.streamed());
        assert_eq!(outcome.pipes.len(), 1);
        assert!(pacer.pauses.is_empty());
        assert_eq!(backend.count_events(&MockEvent::WritePipe(1)), 0);
        assert_eq!(outcome.exit_code(), 0);
        assert_eq!(outcome.teardown.count(), 2);
    }

    #[test]
    fn test_probe_writes_precede_streaming() {
        let backend = MockBackend::new(vec![MockDevice::default()]);
        let mut plan = plan(2);
        plan.probe_pipes = vec![1, 2];
        let (outcome, _) = run(&backend, &plan);

        assert_eq!(outcome.probes.len(), 2);
        assert_eq!(outcome.probes[0].status, StatusCode::SUCCESS);
        assert_eq!(outcome.probes[1].status, StatusCode::BAD_ARGUMENT);
        assert_eq!(outcome.stream.as_ref().map(|s| s.frames_sent()), Some(2));
        assert_eq!(backend.count_events(&MockEvent::WritePipe(1)), 3);
        assert_eq!(outcome.last_status, StatusCode::SUCCESS);
    }

    #[test]
    fn test_probe_only_with_probe_writes() {
        let backend = MockBackend::new(vec![MockDevice::default()]);
        let mut plan = plan(200);
        plan.probe_only = true;
        plan.probe_pipes = vec![2];
        let (outcome, _) = run(&backend, &plan);

        assert_eq!(outcome.probes.len(), 1);
        assert_eq!(outcome.last_status, StatusCode::BAD_ARGUMENT);
        assert!(!outcome.streamed());
        assert_eq!(outcome.exit_code(), 0);
    }
}
