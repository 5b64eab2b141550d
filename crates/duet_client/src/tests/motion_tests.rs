use std::time::Duration;

use serde_json::json;
use shared::domain::Axis;
use tokio::time::{sleep, timeout, Instant};

use super::*;
use crate::{model::MachineModel, simulated::default_document};

fn config() -> SupervisorConfig {
    SupervisorConfig {
        poll_interval: Duration::from_millis(10),
        idle_timeout: Duration::from_secs(1),
        reconnect_attempts: 3,
        reconnect_delay: Duration::from_millis(1),
        ..SupervisorConfig::default()
    }
}

async fn connected(machine: &SimulatedMachine) -> MotionController {
    let mut motion = MotionController::simulated(machine, config());
    motion.connect().await.expect("connect");
    machine.clear_commands().await;
    motion
}

async fn wait_for_model(motion: &MotionController, check: impl Fn(&MachineModel) -> bool) {
    timeout(Duration::from_secs(2), async {
        loop {
            let model = motion.supervisor().snapshot().await.expect("snapshot");
            if check(&model) {
                break;
            }
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("model should catch up");
}

#[tokio::test]
async fn connect_forces_absolute_mode() {
    let machine = SimulatedMachine::new();
    let mut motion = MotionController::simulated(&machine, config());
    motion.connect().await.expect("connect");

    assert_eq!(machine.commands().await, vec!["G90"]);
    assert!(motion.is_absolute());
    assert_eq!(motion.homing(), HomingState::default());
}

#[tokio::test]
async fn moves_before_homing_send_nothing() {
    let machine = SimulatedMachine::new();
    let mut motion = connected(&machine).await;

    let err = motion
        .move_absolute(MoveTarget::xy(10.0, 20.0), false)
        .await
        .expect_err("unhomed move");
    match err {
        DuetError::NotHomed { axes } => assert_eq!(axes, vec![Axis::X, Axis::Y]),
        other => panic!("unexpected error {other:?}"),
    }
    let err = motion
        .move_relative(MoveTarget::z(-5.0), false)
        .await
        .expect_err("unhomed move");
    assert!(matches!(err, DuetError::NotHomed { .. }));

    assert!(machine.commands().await.is_empty());
    assert!(motion.is_absolute());
}

#[tokio::test]
async fn y_is_homed_before_x() {
    let machine = SimulatedMachine::new();
    let mut motion = connected(&machine).await;

    motion.home(&[Axis::X, Axis::Y]).await.expect("home");

    assert_eq!(machine.commands().await, vec!["G28 Y", "G28 X", "G90"]);
    let homing = motion.homing();
    assert!(homing.is_homed(Axis::X) && homing.is_homed(Axis::Y));
    assert!(!homing.is_homed(Axis::Z));
}

#[tokio::test]
async fn home_all_parks_a_held_tool_first() {
    let mut document = default_document();
    document["state"]["currentTool"] = json!(1);
    let machine = SimulatedMachine::with_document(document);
    let mut motion = connected(&machine).await;

    motion.home_all().await.expect("home all");

    assert_eq!(machine.commands().await, vec!["T-1", "G28", "G90"]);
    assert!(motion.homing().all());
    assert_eq!(motion.active_tool_index().await.expect("tool"), -1);
}

#[tokio::test]
async fn requesting_every_axis_issues_a_single_home() {
    let machine = SimulatedMachine::new();
    let mut motion = connected(&machine).await;

    motion.home(&Axis::ALL).await.expect("home");

    assert_eq!(machine.commands().await, vec!["G28", "G90"]);
    assert!(motion.homing().all());
}

#[tokio::test]
async fn home_xyu_learns_z_from_the_model() {
    let machine = SimulatedMachine::new();
    let mut motion = connected(&machine).await;
    motion.home_xyu().await.expect("home xyu");
    assert_eq!(machine.commands().await, vec!["G28 Y", "G28 X", "G28 U", "G90"]);
    assert!(!motion.homing().is_homed(Axis::Z));

    let mut document = default_document();
    document["move"]["axes"][2]["homed"] = json!(true);
    let machine = SimulatedMachine::with_document(document);
    let mut motion = connected(&machine).await;
    motion.home_xyu().await.expect("home xyu");
    assert!(motion.homing().all());
}

#[tokio::test]
async fn guard_accepts_axes_the_model_reports_homed() {
    let mut document = default_document();
    for axis in 0..4 {
        document["move"]["axes"][axis]["homed"] = json!(true);
    }
    let machine = SimulatedMachine::with_document(document);
    let mut motion = connected(&machine).await;

    motion
        .move_absolute(MoveTarget::xy(1.0, 2.0), false)
        .await
        .expect("move");
    assert_eq!(machine.commands().await, vec!["G0 X1 Y2 F13000"]);
    assert!(motion.homing().is_homed(Axis::X));
}

#[tokio::test]
async fn mode_switches_only_on_transitions() {
    let machine = SimulatedMachine::new();
    let mut motion = connected(&machine).await;
    motion.home_all().await.expect("home all");
    machine.clear_commands().await;

    motion.move_relative(MoveTarget::z(1.0), false).await.expect("move");
    motion.move_relative(MoveTarget::z(1.0), false).await.expect("move");
    motion.move_absolute(MoveTarget::z(5.0), false).await.expect("move");
    motion.move_absolute(MoveTarget::xyz(10.0, 20.5, 5.0), false).await.expect("move");

    assert_eq!(
        machine.commands().await,
        vec![
            "G91",
            "G0 Z1 F13000",
            "G0 Z1 F13000",
            "G90",
            "G0 Z5 F13000",
            "G0 X10 Y20.5 Z5 F13000",
        ]
    );
}

#[tokio::test]
async fn empty_targets_send_nothing() {
    let machine = SimulatedMachine::new();
    let mut motion = connected(&machine).await;
    motion
        .move_relative(MoveTarget::default(), false)
        .await
        .expect("empty move");
    assert!(machine.commands().await.is_empty());
}

#[tokio::test]
async fn empty_targets_still_wait_for_motion() {
    let machine = SimulatedMachine::new();
    let mut motion = connected(&machine).await;
    machine.push_patch(json!({"state": {"status": "busy"}})).await;
    wait_for_model(&motion, |model| {
        model.status() == Some(shared::domain::MachineStatus::Busy)
    })
    .await;

    let err = motion
        .move_absolute(MoveTarget::default(), true)
        .await
        .expect_err("machine stays busy");
    assert!(matches!(err, DuetError::MoveTimedOut { .. }));
    assert!(machine.commands().await.is_empty());
}

#[tokio::test]
async fn position_reports_the_tool_tip() {
    let machine = SimulatedMachine::new();
    let mut motion = connected(&machine).await;
    motion.home_all().await.expect("home all");
    motion.pickup_tool(1).await.expect("pickup");
    motion
        .move_absolute(MoveTarget::xyz(10.0, 20.0, 30.0), false)
        .await
        .expect("move");

    wait_for_model(&motion, |model| model.machine_position(Axis::Z) == Some(105.0)).await;
    let position = motion.position().await.expect("position");
    assert_eq!(position, Position { x: 10.0, y: 20.0, z: 30.0 });
}

#[tokio::test]
async fn tool_changes_update_the_cache_immediately() {
    let machine = SimulatedMachine::new();
    let mut motion = connected(&machine).await;

    motion.pickup_tool(-1).await.expect("no-op");
    assert!(machine.commands().await.is_empty());

    motion.pickup_tool(0).await.expect("pickup");
    assert_eq!(motion.active_tool_index().await.expect("tool"), 0);
    motion.park_tool().await.expect("park");
    assert_eq!(motion.active_tool_index().await.expect("tool"), -1);
    assert_eq!(machine.commands().await, vec!["T0", "T-1"]);
}

#[tokio::test]
async fn cached_properties_come_from_the_model() {
    let machine = SimulatedMachine::new();
    let mut motion = connected(&machine).await;

    assert_eq!(motion.tool_z_offsets().await.expect("offsets"), vec![-50.0, -75.0]);
    let limits = motion.axis_limits().await.expect("limits");
    assert_eq!(limits.len(), 4);
    assert_eq!(limits[2].max, 400.0);
}

#[tokio::test]
async fn home_in_place_rejects_unknown_axes_before_sending() {
    let machine = SimulatedMachine::new();
    let mut motion = connected(&machine).await;

    let err = motion.home_in_place(&['x', 'q']).await.expect_err("bad axis");
    assert!(matches!(err, DuetError::InvalidAxis('q')));
    assert!(machine.commands().await.is_empty());

    motion.home_in_place(&['x', 'U']).await.expect("home in place");
    assert_eq!(machine.commands().await, vec!["G92 X0", "G92 U0"]);
}

#[tokio::test]
async fn wait_until_idle_returns_once_idle() {
    let machine = SimulatedMachine::new();
    let motion = connected(&machine).await;
    let started = Instant::now();
    motion
        .wait_until_idle(Duration::from_secs(1))
        .await
        .expect("idle");
    assert!(started.elapsed() >= Duration::from_millis(10));
}

#[tokio::test]
async fn wait_until_idle_times_out_on_a_busy_machine() {
    let machine = SimulatedMachine::new();
    let motion = connected(&machine).await;
    machine.push_patch(json!({"state": {"status": "busy"}})).await;
    wait_for_model(&motion, |model| {
        model.status() == Some(shared::domain::MachineStatus::Busy)
    })
    .await;

    let limit = Duration::from_millis(100);
    let started = Instant::now();
    let err = motion.wait_until_idle(limit).await.expect_err("never idle");

    assert!(matches!(err, DuetError::MoveTimedOut { timeout: waited } if waited == limit));
    let elapsed = started.elapsed();
    assert!(elapsed >= limit);
    assert!(elapsed < limit + Duration::from_millis(10) + Duration::from_millis(100));
}

#[tokio::test]
async fn operations_need_a_connection() {
    let machine = SimulatedMachine::new();
    let mut motion = MotionController::simulated(&machine, config());
    assert!(matches!(
        motion.position().await,
        Err(DuetError::NotConnected)
    ));
    assert!(matches!(
        motion.wait_until_idle(Duration::from_millis(10)).await,
        Err(DuetError::NotConnected)
    ));
}
