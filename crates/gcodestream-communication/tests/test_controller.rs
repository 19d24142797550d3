mod common;

use common::{test_config, wait_until, SimulatedDevice};
use gcodestream_communication::{FlowControlMode, StreamerConfig, StreamingController, Transport};
use gcodestream_core::{ConnectionState, Error, StreamError, StreamEvent, StreamingState};
use std::sync::Arc;
use std::time::Duration;

const PROGRAM: [&str; 3] = ["G28", "G1 X0 Y0 F3000", "G1 X10 Y0 F1500"];

fn controller(device: &Arc<SimulatedDevice>, config: StreamerConfig) -> StreamingController {
    StreamingController::new(device.clone(), config)
}

#[test]
fn test_streams_every_line_in_order_and_completes() {
    let device = SimulatedDevice::acking();
    let ctl = controller(&device, test_config());

    ctl.load_commands(PROGRAM);
    ctl.connect("/dev/sim0", 115200).unwrap();
    ctl.play().unwrap();

    assert!(wait_until(|| ctl.current_status().streaming_state == StreamingState::Complete));
    assert_eq!(device.sent(), PROGRAM.to_vec());

    let status = ctl.current_status();
    assert_eq!(status.position, 3);
    assert_eq!(status.total, 3);
    assert_eq!(status.bytes_outstanding, 0);
    assert_eq!(status.last_event, "Complete");
    assert_eq!(status.commanded_position.x, Some(10.0));
    assert_eq!(status.commanded_position.y, Some(0.0));
}

#[test]
fn test_resend_retransmits_before_moving_on() {
    let mut resent = false;
    let device = SimulatedDevice::new(Box::new(move |line| {
        if line == "G1 X0 Y0 F3000" && !resent {
            resent = true;
            vec!["resend N1".to_string()]
        } else {
            vec!["ok".to_string()]
        }
    }));
    let ctl = controller(&device, test_config());

    ctl.load_commands(PROGRAM);
    ctl.connect("/dev/sim0", 115200).unwrap();
    ctl.play().unwrap();

    assert!(wait_until(|| ctl.current_status().streaming_state == StreamingState::Complete));
    assert_eq!(
        device.sent(),
        vec!["G28", "G1 X0 Y0 F3000", "G1 X0 Y0 F3000", "G1 X10 Y0 F1500"]
    );
    assert_eq!(ctl.current_status().consecutive_resends, 1);
}

#[test]
fn test_resend_rewinds_from_ten_to_four_without_touching_window() {
    let device = SimulatedDevice::silent();
    let ctl = controller(
        &device,
        StreamerConfig {
            receive_buffer_size: 80,
            ..test_config()
        },
    );

    // "G1 X00" is 8 bytes on the wire, so exactly ten lines fit
    let program: Vec<String> = (0..12).map(|i| format!("G1 X{:02}", i)).collect();
    ctl.load_commands(program);
    ctl.connect("/dev/sim0", 115200).unwrap();
    ctl.play().unwrap();

    assert!(wait_until(|| ctl.current_status().position == 10));
    assert_eq!(ctl.current_status().bytes_outstanding, 80);

    device.inject("resend N4");
    let status = ctl.current_status();
    assert_eq!(status.position, 4);
    assert_eq!(status.bytes_outstanding, 80);

    device.inject("ok");
    assert!(wait_until(|| device.sent().len() == 11));
    assert_eq!(device.sent()[10], "G1 X04");
    assert_eq!(ctl.current_status().position, 5);
}

#[test]
fn test_connect_never_auto_starts() {
    let device = SimulatedDevice::acking();
    let ctl = controller(&device, test_config());

    ctl.load_commands(PROGRAM);
    ctl.connect("/dev/sim0", 115200).unwrap();

    let status = ctl.current_status();
    assert_eq!(status.connection_state, ConnectionState::Connected);
    assert_eq!(status.streaming_state, StreamingState::Paused);
    std::thread::sleep(Duration::from_millis(50));
    assert!(device.sent().is_empty());
}

#[test]
fn test_pause_twice_is_idempotent() {
    let device = SimulatedDevice::silent();
    let ctl = controller(
        &device,
        StreamerConfig {
            receive_buffer_size: 20,
            ..test_config()
        },
    );

    ctl.load_commands(PROGRAM);
    ctl.connect("/dev/sim0", 115200).unwrap();
    ctl.play().unwrap();
    assert!(wait_until(|| ctl.current_status().position == 1));

    ctl.pause();
    let first = ctl.current_status();
    ctl.pause();
    let second = ctl.current_status();

    assert_eq!(first.streaming_state, StreamingState::Paused);
    assert_eq!(second.streaming_state, StreamingState::Paused);
    assert_eq!(first.position, second.position);
    assert_eq!(first.bytes_outstanding, second.bytes_outstanding);

    // Acks free the window, but a paused session sends nothing new
    device.inject("ok");
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(device.sent().len(), 1);
}

#[test]
fn test_replace_upcoming_only_touches_unsent_suffix() {
    let device = SimulatedDevice::silent();
    let ctl = controller(
        &device,
        StreamerConfig {
            receive_buffer_size: 14,
            ..test_config()
        },
    );

    ctl.load_commands(["G1 X1", "G1 X2", "G1 X3", "G1 X4", "G1 X5"]);
    ctl.connect("/dev/sim0", 115200).unwrap();
    ctl.play().unwrap();
    assert!(wait_until(|| ctl.current_status().position == 2));

    ctl.replace_upcoming(["G0 Z5", "G0 Z6", "G0 Z7"]);
    assert_eq!(
        ctl.commands(),
        vec!["G1 X1", "G1 X2", "G0 Z5", "G0 Z6", "G0 Z7"]
    );

    for expected in 3..=5 {
        device.inject("ok");
        assert!(wait_until(|| device.sent().len() == expected));
    }
    assert!(wait_until(|| ctl.current_status().streaming_state == StreamingState::Complete));
    assert_eq!(
        device.sent(),
        vec!["G1 X1", "G1 X2", "G0 Z5", "G0 Z6", "G0 Z7"]
    );
}

#[test]
fn test_sequenced_lines_carry_checksums() {
    let device = SimulatedDevice::acking();
    let ctl = controller(
        &device,
        StreamerConfig {
            line_numbers: true,
            ..test_config()
        },
    );

    ctl.load_commands(["G28", "M105", "G1 X10 Y20 ; corner"]);
    ctl.connect("/dev/sim0", 115200).unwrap();
    ctl.play().unwrap();

    assert!(wait_until(|| ctl.current_status().streaming_state == StreamingState::Complete));
    assert_eq!(
        device.sent(),
        vec!["M110 N0", "N1 G28 *50", "M105", "N2 G1 X10 Y20 *8"]
    );
}

#[test]
fn test_sequenced_resend_maps_line_number_to_index() {
    let mut rejected = false;
    let device = SimulatedDevice::new(Box::new(move |line| {
        if line.starts_with("N3 ") && !rejected {
            rejected = true;
            vec![
                "Error:checksum mismatch, Last Line: 2".to_string(),
                "Resend: 3".to_string(),
                "ok".to_string(),
            ]
        } else {
            vec!["ok".to_string()]
        }
    }));
    let ctl = controller(
        &device,
        StreamerConfig {
            line_numbers: true,
            ..test_config()
        },
    );

    ctl.load_commands(["G28", "G1 X1", "G1 X2", "G1 X3"]);
    ctl.connect("/dev/sim0", 115200).unwrap();
    ctl.play().unwrap();

    assert!(wait_until(|| ctl.current_status().streaming_state == StreamingState::Complete));
    let sent = device.sent();
    let numbered: Vec<&str> = sent
        .iter()
        .filter(|l| l.starts_with('N'))
        .map(|l| l.split(' ').next().unwrap_or_default())
        .collect();
    assert_eq!(numbered, vec!["N1", "N2", "N3", "N3", "N4"]);

    let status = ctl.current_status();
    assert_eq!(
        status.last_device_error.as_deref(),
        Some("Error:checksum mismatch, Last Line: 2")
    );
    assert_eq!(status.bytes_outstanding, 0);
}

#[test]
fn test_manual_command_is_sent_while_paused() {
    let device = SimulatedDevice::acking();
    let ctl = controller(&device, test_config());

    ctl.load_commands(PROGRAM);
    ctl.connect("/dev/sim0", 115200).unwrap();
    ctl.send_command("M114 ; where am I").unwrap();

    assert!(wait_until(|| device.sent() == vec!["M114"]));
    let status = ctl.current_status();
    assert_eq!(status.streaming_state, StreamingState::Paused);
    assert_eq!(status.position, 0);
}

#[test]
fn test_firmware_query_on_connect() {
    let device = SimulatedDevice::acking();
    let ctl = controller(
        &device,
        StreamerConfig {
            query_firmware_on_connect: true,
            ..test_config()
        },
    );

    ctl.connect("/dev/sim0", 115200).unwrap();
    assert!(wait_until(|| device.sent() == vec!["M115"]));
    assert_eq!(ctl.current_status().streaming_state, StreamingState::Idle);
}

#[test]
fn test_write_failure_pauses_and_rolls_back() {
    let device = SimulatedDevice::acking();
    device.set_fail_writes(true);
    let ctl = controller(&device, test_config());

    ctl.load_commands(PROGRAM);
    ctl.connect("/dev/sim0", 115200).unwrap();
    ctl.play().unwrap();

    assert!(wait_until(|| ctl.current_status().streaming_state == StreamingState::Paused));
    let status = ctl.current_status();
    assert_eq!(status.position, 0);
    assert_eq!(status.bytes_outstanding, 0);
    assert!(status.last_event.starts_with("Write failed"), "{}", status.last_event);
    assert_eq!(status.connection_state, ConnectionState::Connected);

    device.set_fail_writes(false);
    ctl.play().unwrap();
    assert!(wait_until(|| ctl.current_status().streaming_state == StreamingState::Complete));
    assert_eq!(device.sent(), PROGRAM.to_vec());
}

#[test]
fn test_oversized_line_pauses_streaming() {
    let device = SimulatedDevice::acking();
    let ctl = controller(
        &device,
        StreamerConfig {
            receive_buffer_size: 10,
            ..test_config()
        },
    );

    ctl.load_commands(["G28", "G1 X100 Y100"]);
    ctl.connect("/dev/sim0", 115200).unwrap();
    ctl.play().unwrap();

    assert!(wait_until(|| ctl.current_status().streaming_state == StreamingState::Paused));
    let status = ctl.current_status();
    assert_eq!(status.position, 1);
    assert!(status.last_event.contains("device buffer holds 10"));
    assert_eq!(device.sent(), vec!["G28"]);
}

#[test]
fn test_unthrottled_mode_ignores_window() {
    let device = SimulatedDevice::silent();
    let ctl = controller(
        &device,
        StreamerConfig {
            receive_buffer_size: 10,
            flow_control: FlowControlMode::Unthrottled,
            ..test_config()
        },
    );

    ctl.load_commands(PROGRAM);
    ctl.connect("/dev/sim0", 115200).unwrap();
    ctl.play().unwrap();

    assert!(wait_until(|| ctl.current_status().streaming_state == StreamingState::Complete));
    assert_eq!(device.sent().len(), 3);
    assert_eq!(ctl.current_status().bytes_outstanding, 0);
}

#[test]
fn test_stall_is_reported() {
    let device = SimulatedDevice::silent();
    let ctl = controller(
        &device,
        StreamerConfig {
            receive_buffer_size: 20,
            stall_timeout: Duration::from_millis(50),
            ..test_config()
        },
    );
    let mut events = ctl.subscribe();

    ctl.load_commands(PROGRAM);
    ctl.connect("/dev/sim0", 115200).unwrap();
    ctl.play().unwrap();

    assert!(wait_until(|| ctl.current_status().stalled));
    assert!(wait_until(|| {
        std::iter::from_fn(|| events.try_recv().ok()).any(|e| e == StreamEvent::Stalled)
    }));

    // The ack frees the window and the next line goes out, which is progress
    device.inject("ok");
    assert!(!ctl.current_status().stalled);
    assert!(wait_until(|| device.sent().len() == 2));
}

#[test]
fn test_play_preconditions() {
    let device = SimulatedDevice::acking();
    let ctl = controller(&device, test_config());

    assert!(matches!(
        ctl.play(),
        Err(Error::Stream(StreamError::NotConnected))
    ));

    ctl.connect("/dev/sim0", 115200).unwrap();
    assert!(matches!(
        ctl.play(),
        Err(Error::Stream(StreamError::NothingToStream))
    ));
    assert!(matches!(
        ctl.connect("/dev/sim0", 115200),
        Err(Error::Stream(StreamError::AlreadyConnected))
    ));

    ctl.load_commands(["G28"]);
    ctl.play().unwrap();
    assert!(wait_until(|| ctl.current_status().streaming_state == StreamingState::Complete));

    ctl.play().unwrap();
    assert_eq!(ctl.current_status().streaming_state, StreamingState::Complete);
    assert_eq!(device.sent(), vec!["G28"]);
}

#[test]
fn test_connect_failure_marks_failed() {
    let device = SimulatedDevice::acking();
    device.set_fail_open(true);
    let ctl = controller(&device, test_config());

    let err = ctl.connect("/dev/missing", 115200).unwrap_err();
    assert!(err.is_port_error());
    assert_eq!(
        ctl.current_status().connection_state,
        ConnectionState::Failed
    );

    device.set_fail_open(false);
    ctl.connect("/dev/sim0", 115200).unwrap();
    assert_eq!(
        ctl.current_status().connection_state,
        ConnectionState::Connected
    );
}

#[test]
fn test_disconnect_keeps_program_and_clears_window() {
    let device = SimulatedDevice::silent();
    let ctl = controller(&device, test_config());

    ctl.load_commands(PROGRAM);
    ctl.connect("/dev/sim0", 115200).unwrap();
    ctl.play().unwrap();
    assert!(wait_until(|| ctl.current_status().position == 3));

    ctl.disconnect().unwrap();
    let status = ctl.current_status();
    assert_eq!(status.connection_state, ConnectionState::Disconnected);
    assert_eq!(status.streaming_state, StreamingState::Idle);
    assert_eq!(status.bytes_outstanding, 0);
    assert_eq!(status.total, 3);
    assert!(!device.is_open());
}

#[test]
fn test_reset_starts_over() {
    let device = SimulatedDevice::silent();
    let ctl = controller(&device, test_config());

    ctl.load_commands(PROGRAM);
    ctl.connect("/dev/sim0", 115200).unwrap();
    ctl.play().unwrap();
    assert!(wait_until(|| ctl.current_status().position == 3));

    ctl.reset(["G28", "G1 X5"]);
    let status = ctl.current_status();
    assert_eq!(status.position, 0);
    assert_eq!(status.total, 2);
    assert_eq!(status.bytes_outstanding, 0);
    assert_eq!(status.streaming_state, StreamingState::Paused);
    assert_eq!(status.connection_state, ConnectionState::Connected);
}

#[test]
fn test_events_follow_session_lifecycle() {
    let device = SimulatedDevice::acking();
    let ctl = controller(&device, test_config());
    let mut events = ctl.subscribe();

    ctl.load_commands(PROGRAM);
    ctl.connect("/dev/sim0", 115200).unwrap();
    ctl.play().unwrap();
    assert!(wait_until(|| ctl.current_status().streaming_state == StreamingState::Complete));
    ctl.disconnect().unwrap();

    let seen: Vec<StreamEvent> = std::iter::from_fn(|| events.try_recv().ok()).collect();
    let position = |wanted: &StreamEvent| seen.iter().position(|e| e == wanted);

    let connected = position(&StreamEvent::ConnectionChanged(ConnectionState::Connected));
    let completed = position(&StreamEvent::Completed);
    let disconnected = position(&StreamEvent::ConnectionChanged(ConnectionState::Disconnected));
    assert!(connected.is_some() && completed.is_some() && disconnected.is_some());
    assert!(connected < completed && completed < disconnected);

    let sent = seen
        .iter()
        .filter(|e| matches!(e, StreamEvent::LineSent { index: Some(_), .. }))
        .count();
    assert_eq!(sent, 3);
}

#[test]
fn test_stall_is_reported_after_complete() {
    let device = SimulatedDevice::silent();
    let ctl = controller(
        &device,
        StreamerConfig {
            stall_timeout: Duration::from_millis(50),
            ..test_config()
        },
    );
    let mut events = ctl.subscribe();

    ctl.load_commands(["G28"]);
    ctl.connect("/dev/sim0", 115200).unwrap();
    ctl.play().unwrap();
    assert!(wait_until(|| ctl.current_status().streaming_state == StreamingState::Complete));

    // The last line was handed over but never acknowledged
    assert!(wait_until(|| ctl.current_status().stalled));
    let status = ctl.current_status();
    assert_eq!(status.streaming_state, StreamingState::Complete);
    assert_eq!(status.bytes_outstanding, 5);
    assert!(wait_until(|| {
        std::iter::from_fn(|| events.try_recv().ok()).any(|e| e == StreamEvent::Stalled)
    }));

    device.inject("ok");
    let status = ctl.current_status();
    assert!(!status.stalled);
    assert_eq!(status.bytes_outstanding, 0);
}

#[test]
fn test_failed_manual_write_leaves_no_pending_entry() {
    let device = SimulatedDevice::silent();
    device.set_fail_writes(true);
    let ctl = controller(&device, test_config());

    ctl.connect("/dev/sim0", 115200).unwrap();
    ctl.send_command("M105").unwrap();
    assert!(wait_until(|| ctl
        .current_status()
        .last_event
        .starts_with("Write failed")));
    assert!(device.sent().is_empty());

    device.set_fail_writes(false);
    ctl.load_commands(["G28"]);
    ctl.play().unwrap();
    assert!(wait_until(|| device.sent() == vec!["G28"]));
    assert_eq!(ctl.current_status().bytes_outstanding, 5);

    // The single ok belongs to G28, not to the write that never happened
    device.inject("ok");
    let status = ctl.current_status();
    assert_eq!(status.bytes_outstanding, 0);
    assert_eq!(status.streaming_state, StreamingState::Complete);
}
