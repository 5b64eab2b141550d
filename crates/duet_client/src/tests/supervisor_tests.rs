use std::time::Duration;

use shared::domain::Axis;

use super::*;

fn config(attempts: u32) -> SupervisorConfig {
    SupervisorConfig {
        poll_interval: Duration::from_millis(10),
        reconnect_attempts: attempts,
        reconnect_delay: Duration::from_millis(1),
        ..SupervisorConfig::default()
    }
}

#[test]
fn defaults_match_the_firmware_cadence() {
    let config = SupervisorConfig::default();
    assert_eq!(config.poll_interval, Duration::from_millis(250));
    assert_eq!(config.reconnect_attempts, 10);
    assert_eq!(config.reconnect_delay, Duration::from_secs(1));
    assert_eq!(config.command_timeout, None);
}

#[tokio::test]
async fn connect_starts_both_channels() {
    let machine = SimulatedMachine::new();
    let mut supervisor = ConnectionSupervisor::simulated(&machine, config(3));
    assert!(matches!(supervisor.channel(), Err(DuetError::NotConnected)));

    supervisor.connect().await.expect("connect");
    assert!(supervisor.is_connected());
    assert_eq!(supervisor.deployment(), Deployment::Simulated);
    assert!(supervisor.model().expect("model").is_running().await);

    supervisor.send("M400").await.expect("send");
    assert_eq!(machine.commands().await, vec!["M400"]);

    supervisor.connect().await.expect("second connect is a no-op");
    assert_eq!(machine.open_attempts().await, 1);
}

#[tokio::test]
async fn disconnect_is_idempotent() {
    let machine = SimulatedMachine::new();
    let mut supervisor = ConnectionSupervisor::simulated(&machine, config(3));
    supervisor.connect().await.expect("connect");
    let handle = supervisor.model().expect("model");

    supervisor.disconnect().await;
    supervisor.disconnect().await;

    assert!(!supervisor.is_connected());
    assert!(!handle.is_running().await);
}

#[tokio::test]
async fn reset_clears_homing_and_reconnects() {
    let machine = SimulatedMachine::new();
    let mut supervisor = ConnectionSupervisor::simulated(&machine, config(3));
    supervisor.connect().await.expect("connect");
    supervisor.set_homed(Axis::X, true);
    supervisor.set_active_tool(1);

    supervisor.reset().await.expect("reset");

    assert!(supervisor.is_connected());
    assert_eq!(supervisor.homing(), HomingState::default());
    assert_eq!(supervisor.active_tool_index().await.expect("tool"), -1);
    assert_eq!(machine.commands().await, vec!["M999"]);
    assert_eq!(machine.open_attempts().await, 2);
}

#[tokio::test]
async fn reconnect_gives_up_after_the_budget() {
    let machine = SimulatedMachine::new();
    let mut supervisor = ConnectionSupervisor::simulated(&machine, config(4));
    supervisor.connect().await.expect("connect");
    machine.refuse_connections(true).await;

    let err = supervisor.reset().await.expect_err("machine refuses");

    assert!(matches!(err, DuetError::ReconnectFailed { attempts: 4 }));
    assert_eq!(machine.open_attempts().await, 1 + 4);
    assert!(!supervisor.is_connected());
}

#[tokio::test]
async fn reconnect_succeeds_once_the_machine_returns() {
    let machine = SimulatedMachine::new();
    let mut supervisor = ConnectionSupervisor::simulated(&machine, config(5));
    machine.refuse_connections(true).await;
    assert!(matches!(
        supervisor.connect().await,
        Err(DuetError::Connection(_))
    ));

    machine.refuse_connections(false).await;
    supervisor.reconnect().await.expect("reconnect");
    assert_eq!(machine.open_attempts().await, 2);
}
