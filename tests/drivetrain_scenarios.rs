// End-to-end drivetrain behaviour over the simulated bus

use drivetrain_core::bus::sim::{SimBus, SimWrite};
use drivetrain_core::bus::{Register, RetryPolicy};
use drivetrain_core::config::DrivetrainConfig;
use drivetrain_core::drivetrain::{
    ControlMode, DrivetrainController, FirmwareMode, ShiftState, Side, VelocityPolicy,
};
use drivetrain_core::DrivetrainError;

const LEFT_LEADER: u8 = 1;
const RIGHT_LEADER: u8 = 4;
const SHIFTER: u8 = 10;

fn setup() -> (SimBus, DrivetrainController) {
    let config = DrivetrainConfig::default();
    let sim = SimBus::for_drivetrain(&config.left_ids, &config.right_ids, config.shifter_id);
    let controller = DrivetrainController::new(&config, Box::new(sim.clone())).unwrap();
    sim.clear_writes();
    (sim, controller)
}

fn firmware_mode(sim: &SimBus, id: u8) -> Option<FirmwareMode> {
    sim.register(id, Register::ControlMode)
        .and_then(|raw| FirmwareMode::try_from(raw as u8).ok())
}

fn mode_writes(writes: &[SimWrite]) -> Vec<&SimWrite> {
    writes
        .iter()
        .filter(|w| w.register == Register::ControlMode)
        .collect()
}

#[test]
fn followers_bound_to_leader_after_construction() {
    let (sim, controller) = setup();

    for (side, leader, followers) in [(Side::Left, 1, [2, 3]), (Side::Right, 4, [5, 6])] {
        let bank = controller.bank(side);
        assert_eq!(bank.leader().id(), leader);
        assert_eq!(bank.followers().len(), 2);
        for id in followers {
            assert_eq!(firmware_mode(&sim, id), Some(FirmwareMode::Follower));
            assert_eq!(sim.register(id, Register::FollowTarget), Some(leader as f32));
        }
    }
}

#[test]
fn raw_drive_from_closed_loop_switches_mode_before_writing() {
    let (sim, mut controller) = setup();
    controller
        .drive(200.0, 200.0, ControlMode::ClosedLoopVelocity)
        .unwrap();
    sim.clear_writes();

    controller.drive(0.5, 0.5, ControlMode::RawPower).unwrap();

    let writes = sim.writes();
    let last_mode_write = writes
        .iter()
        .rposition(|w| w.register == Register::ControlMode)
        .unwrap();
    let first_setpoint = writes
        .iter()
        .position(|w| w.register == Register::Setpoint)
        .unwrap();
    assert!(last_mode_write < first_setpoint);
    assert_eq!(mode_writes(&writes).len(), 2);

    assert_eq!(controller.current_mode(), Some(ControlMode::RawPower));
    for leader in [LEFT_LEADER, RIGHT_LEADER] {
        assert_eq!(firmware_mode(&sim, leader), Some(FirmwareMode::RawPower));
        assert_eq!(sim.register(leader, Register::Setpoint), Some(0.5));
    }
    assert_eq!(controller.bank(Side::Left).leader().commanded(), 0.5);
    assert_eq!(controller.bank(Side::Right).leader().commanded(), 0.5);

    // Followers mirror one-to-one
    for follower in [2, 3, 5, 6] {
        assert_eq!(sim.applied_output(follower), 0.5);
    }
}

#[test]
fn leaders_never_split_modes() {
    let (sim, mut controller) = setup();
    let sequence = [
        ControlMode::RawPower,
        ControlMode::ClosedLoopPosition,
        ControlMode::ClosedLoopPosition,
        ControlMode::Disabled,
        ControlMode::ClosedLoopVelocity,
        ControlMode::RawPower,
    ];

    for mode in sequence {
        controller.drive(0.1, -0.1, mode).unwrap();
        let left = firmware_mode(&sim, LEFT_LEADER);
        assert_eq!(left, firmware_mode(&sim, RIGHT_LEADER));
        assert_eq!(left, Some(mode.firmware()));
    }
}

#[test]
fn leaders_never_split_modes_after_bus_failure() {
    let (sim, mut controller) = setup();
    sim.inject_timeouts(RIGHT_LEADER, RetryPolicy::default().max_attempts);

    let err = controller
        .drive(10.0, 10.0, ControlMode::ClosedLoopVelocity)
        .unwrap_err();
    assert!(matches!(err, DrivetrainError::BusTimeout { .. }));

    assert_eq!(controller.current_mode(), Some(ControlMode::RawPower));
    assert_eq!(
        firmware_mode(&sim, LEFT_LEADER),
        firmware_mode(&sim, RIGHT_LEADER)
    );
}

#[test]
fn repeated_mode_request_writes_hardware_once() {
    let (sim, mut controller) = setup();

    controller.disable().unwrap();
    let after_first = sim.writes().len();
    assert_eq!(after_first, 2);

    controller.disable().unwrap();
    assert_eq!(sim.writes().len(), after_first);
}

#[test]
fn shift_down_refused_at_non_positive_speed() {
    for (left, right) in [(0.0, 0.0), (-10.0, 0.0), (0.0, -0.5), (-300.0, -300.0)] {
        let (sim, mut controller) = setup();
        controller.shift_up().unwrap();
        sim.set_velocity(LEFT_LEADER, left);
        sim.set_velocity(RIGHT_LEADER, right);

        let result = controller.shift_down();
        assert!(matches!(
            result,
            Err(DrivetrainError::UnsafeShiftRequested { .. })
        ));
        assert_eq!(controller.shift_state(), Some(ShiftState::High));
        assert_eq!(sim.writes_to(SHIFTER).len(), 1);
    }
}

#[test]
fn shift_down_while_moving_forward() {
    let (sim, mut controller) = setup();
    controller.shift_up().unwrap();
    sim.set_velocity(RIGHT_LEADER, 120.0);

    controller.shift_down().unwrap();
    assert_eq!(controller.shift_state(), Some(ShiftState::Low));
}

#[test]
fn double_shift_up_issues_one_write() {
    let (sim, mut controller) = setup();
    controller.shift_up().unwrap();
    controller.shift_up().unwrap();

    assert_eq!(controller.shift_state(), Some(ShiftState::High));
    assert!(sim.writes_to(SHIFTER).len() <= 1);
}

#[test]
fn reset_position_reads_back_zero() {
    for prior in [0.0, 1.0, -98765.0, 4096.5] {
        let (sim, mut controller) = setup();
        sim.set_position(LEFT_LEADER, prior);
        sim.set_position(RIGHT_LEADER, -prior);

        controller.reset_position().unwrap();

        let status = controller.status().unwrap();
        assert_eq!(status.left.position, 0.0);
        assert_eq!(status.right.position, 0.0);
    }
}

#[test]
fn timeouts_within_retry_window_are_invisible() {
    let (sim, mut controller) = setup();

    // First two attempts time out, the third goes through
    sim.inject_timeouts(LEFT_LEADER, 2);
    controller.drive(0.3, 0.3, ControlMode::RawPower).unwrap();

    assert_eq!(sim.pending_timeouts(LEFT_LEADER), 0);
    assert_eq!(sim.register(LEFT_LEADER, Register::Setpoint), Some(0.3));
}

#[test]
fn tighter_shift_policy_from_config() {
    let config = DrivetrainConfig {
        shift_policy: VelocityPolicy::BelowSpeed {
            max_abs_velocity: 50.0,
        },
        ..Default::default()
    };
    let sim = SimBus::for_drivetrain(&config.left_ids, &config.right_ids, config.shifter_id);
    let mut controller = DrivetrainController::new(&config, Box::new(sim.clone())).unwrap();
    controller.shift_up().unwrap();

    sim.set_velocity(LEFT_LEADER, 400.0);
    assert!(controller.shift_down().is_err());

    sim.set_velocity(LEFT_LEADER, 20.0);
    controller.shift_down().unwrap();
    assert_eq!(controller.shift_state(), Some(ShiftState::Low));
}

#[test]
fn unreachable_motor_aborts_construction() {
    let config = DrivetrainConfig::default();
    let sim = SimBus::for_drivetrain(&[1, 2, 3], &[4, 6], 10);
    let err = DrivetrainController::new(&config, Box::new(sim)).err().unwrap();
    assert!(matches!(err, DrivetrainError::HardwareInit(_)));
}

#[test]
fn missing_shifter_aborts_construction() {
    let config = DrivetrainConfig::default();
    let sim = SimBus::for_drivetrain(&[1, 2, 3], &[4, 5, 6], 11);
    let err = DrivetrainController::new(&config, Box::new(sim)).err().unwrap();
    assert!(matches!(err, DrivetrainError::HardwareInit(_)));
}
