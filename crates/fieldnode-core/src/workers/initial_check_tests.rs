use crate::sensor::SensorKind;
use crate::startup::{GateSignal, Stage};
use crate::test_support::{fast_config, Rig};
use crate::workers::initial_check::{self, MEMORY_LOW};

#[tokio::test]
async fn healthy_board_signals_gate_without_errors() {
    // Arrange
    let rig = Rig::new();
    let (ctx, _parts) = rig.build(fast_config());
    let (gate, done) = GateSignal::pair(Stage::InitialCheck);

    // Act
    let report = initial_check::run(ctx.clone(), gate).await;

    // Assert
    assert!(done.await.is_ok());
    assert_eq!(report.channels_ok, vec![SensorKind::Humidity, SensorKind::Light]);
    assert!(report.channels_failed.is_empty());
    assert!(!report.memory_low);
    assert_eq!(report.free_heap, Some(200_000));
    assert_eq!(ctx.errors.pending_count(), 0);
}

#[tokio::test]
async fn low_memory_is_reported_once_per_sensor() {
    // Arrange
    let mut rig = Rig::new();
    rig.free_heap = 10_000;
    let (ctx, _parts) = rig.build(fast_config());
    let (gate, done) = GateSignal::pair(Stage::InitialCheck);

    // Act
    let report = initial_check::run(ctx.clone(), gate).await;

    // Assert
    assert!(done.await.is_ok());
    assert!(report.memory_low);
    assert_eq!(ctx.errors.pending_count(), 2, "{MEMORY_LOW} fans out to both sensors");
}

#[tokio::test]
async fn missing_channel_is_recorded_and_still_signals() {
    // Arrange
    let mut rig = Rig::new();
    rig.adc = crate::test_support::FakeAdc::with(SensorKind::Humidity.channel(), 1500);
    let (ctx, _parts) = rig.build(fast_config());
    let (gate, done) = GateSignal::pair(Stage::InitialCheck);

    // Act
    let report = initial_check::run(ctx.clone(), gate).await;

    // Assert
    assert!(done.await.is_ok());
    assert_eq!(report.channels_ok, vec![SensorKind::Humidity]);
    assert_eq!(report.channels_failed, vec![SensorKind::Light]);
    assert_eq!(ctx.errors.pending_count(), 1);
}
