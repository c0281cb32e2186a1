use std::time::{Duration, Instant};

use harvest_console::{
    operator_error_code, open_link, DirectedRpm, DriveLink, DriveSetpoint, HarvestCommand,
    HarvestLink, MemoryLink, MotorDirection, LINK_ALREADY_OPEN,
};

fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    false
}

fn forward(left: u16, right: u16) -> DriveSetpoint {
    DriveSetpoint::new(
        DirectedRpm::new(MotorDirection::Forward, left).unwrap(),
        DirectedRpm::new(MotorDirection::Forward, right).unwrap(),
    )
}

#[test]
fn stub_ports_open_through_open_link() {
    let mut harvest = HarvestLink::new();
    harvest.connect("stub://harvest", 115_200).unwrap();
    assert!(harvest.is_connected());
    harvest.send(&HarvestCommand::Forward).unwrap();

    let err = harvest.connect("stub://harvest", 115_200).unwrap_err();
    assert_eq!(operator_error_code(&err), Some(LINK_ALREADY_OPEN));

    harvest.disconnect().unwrap();
    assert!(!harvest.is_connected());
    // reconnect after close is allowed
    harvest.connect("stub://harvest", 115_200).unwrap();
    harvest.disconnect().unwrap();

    assert!(open_link("stub://drive", 9_600).is_ok());
}

#[test]
fn never_opened_links_close_cleanly() {
    let mut harvest = HarvestLink::new();
    harvest.disconnect().unwrap();
    let mut drive = DriveLink::new();
    drive.disconnect().unwrap();
    drive.disconnect().unwrap();
}

#[test]
fn streams_live_setpoint_on_fixed_cadence() {
    let (link, peer) = MemoryLink::pair("stub://drive");
    let mut drive = DriveLink::new().with_reset_wait(Duration::ZERO);
    drive.connect_with("stub://drive", Box::new(link)).unwrap();
    drive.set_setpoint(forward(80, 90)).unwrap();
    drive.start_streaming().unwrap();
    // starting twice keeps a single sender
    drive.start_streaming().unwrap();

    std::thread::sleep(Duration::from_millis(520));
    drive.set_setpoint(forward(120, 130)).unwrap();
    std::thread::sleep(Duration::from_millis(200));
    drive.stop_streaming().unwrap();
    assert!(!drive.is_streaming());

    let written = peer.take_written_string();
    let records: Vec<&str> = written.split_terminator('\n').collect();
    // ~14 records in 720 ms at 50 ms; allow scheduler slack both ways
    assert!(
        (8..=18).contains(&records.len()),
        "unexpected record count {}",
        records.len()
    );
    assert_eq!(records[0], "1,80,1,90#");
    assert_eq!(*records.last().unwrap(), "1,120,1,130#");
    assert!(records.iter().all(|r| r.ends_with('#')));

    // stopped streaming writes nothing more
    std::thread::sleep(Duration::from_millis(120));
    assert!(peer.take_written().is_empty());
    assert!(drive.is_connected());
    drive.disconnect().unwrap();
    assert_eq!(peer.close_calls(), 1);
}

#[test]
fn telemetry_pairs_live_target_with_measurement() {
    let (link, peer) = MemoryLink::pair("stub://drive");
    let mut drive = DriveLink::new().with_reset_wait(Duration::ZERO);
    drive.connect_with("stub://drive", Box::new(link)).unwrap();
    drive.set_setpoint(forward(100, 110)).unwrap();

    peer.inject(b"999 97.5 108.25\r\ngarbage line\n100 98\n");
    assert!(wait_for(|| drive.telemetry().unwrap().len() == 1));
    let sample = drive.latest_telemetry().unwrap().unwrap();
    // the controller's echoed target (999) is ignored
    assert_eq!(sample.target_left, 100.0);
    assert_eq!(sample.target_right, 110.0);
    assert_eq!(sample.actual_left, 97.5);
    assert_eq!(sample.actual_right, 108.25);
    assert!(drive.is_connected());

    for i in 0..250 {
        peer.inject(format!("100 {} {}\n", i, i).as_bytes());
    }
    assert!(wait_for(|| drive
        .latest_telemetry()
        .unwrap()
        .is_some_and(|s| s.actual_left == 249.0)));
    let samples = drive.telemetry().unwrap();
    assert_eq!(samples.len(), 200);
    assert_eq!(samples[0].actual_left, 50.0);
    drive.disconnect().unwrap();
}

#[test]
fn streaming_write_failure_closes_drive_link() {
    let (link, peer) = MemoryLink::pair("stub://drive");
    let mut drive = DriveLink::new().with_reset_wait(Duration::ZERO);
    drive.connect_with("stub://drive", Box::new(link)).unwrap();
    drive.start_streaming().unwrap();
    peer.fail_writes(true);
    assert!(wait_for(|| !drive.is_connected()));
    assert!(wait_for(|| !drive.is_streaming()));
    drive.disconnect().unwrap();
    assert_eq!(peer.close_calls(), 1);
}
