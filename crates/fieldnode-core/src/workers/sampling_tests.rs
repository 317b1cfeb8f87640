use std::time::Duration;

use crate::config_sync::ConfigUpdate;
use crate::reporter::CycleOutcome;
use crate::sensor::SensorKind;
use crate::sensor_config::{ConfigOrigin, ConfigPatch};
use crate::test_support::{fast_config, go_online, Rig};
use crate::worker::WorkerKind;
use crate::workers::sampling::{reads_per_report, SampleOutcome, SamplingWorker, SENSOR_READ_ERROR};

#[test]
fn cadence_rounds_interval_up_to_whole_periods() {
    let period = Duration::from_secs(5);

    assert_eq!(reads_per_report(5, period), 1);
    assert_eq!(reads_per_report(60, period), 12);
    assert_eq!(reads_per_report(7, period), 2);
    assert_eq!(reads_per_report(0, period), 1);
    assert_eq!(reads_per_report(3, period), 1);
}

#[tokio::test]
async fn every_read_is_forwarded_when_interval_matches_period() {
    // Arrange
    let rig = Rig::new();
    let (ctx, _parts) = rig.build(fast_config());
    let mut worker = SamplingWorker::new(SensorKind::Humidity, ctx.clone());

    // Act
    let outcome = worker.sample_once().await;

    // Assert
    assert_eq!(outcome, SampleOutcome::Forwarded);
    let reading = ctx.readings.try_pop().expect("reading queued");
    assert_eq!(reading.kind, SensorKind::Humidity);
    assert_eq!(reading.raw_sample, 2000);
    assert!((reading.converted_value - 50.0).abs() < 0.01);
}

#[tokio::test]
async fn interval_update_is_applied_before_the_next_read() {
    // Arrange
    let rig = Rig::new();
    let (ctx, _parts) = rig.build(fast_config());
    let mut worker = SamplingWorker::new(SensorKind::Light, ctx.clone());
    ctx.sync.push(ConfigUpdate {
        kind: SensorKind::Light,
        new_interval_seconds: 10,
        apply: true,
    });
    ctx.sync.push(ConfigUpdate {
        kind: SensorKind::Light,
        new_interval_seconds: 3,
        apply: true,
    });

    // Act
    let outcomes = [
        worker.sample_once().await,
        worker.sample_once().await,
        worker.sample_once().await,
    ];

    // Assert
    assert_eq!(worker.interval_seconds(), 3);
    assert_eq!(worker.reads_per_report(), 3);
    assert_eq!(
        outcomes,
        [SampleOutcome::Counted, SampleOutcome::Counted, SampleOutcome::Forwarded]
    );
    assert_eq!(ctx.readings.len(), 1);
}

#[tokio::test]
async fn update_for_another_sensor_is_not_consumed() {
    // Arrange
    let rig = Rig::new();
    let (ctx, _parts) = rig.build(fast_config());
    let mut worker = SamplingWorker::new(SensorKind::Humidity, ctx.clone());
    ctx.sync.push(ConfigUpdate {
        kind: SensorKind::Light,
        new_interval_seconds: 30,
        apply: true,
    });

    // Act
    worker.sample_once().await;

    // Assert
    assert_eq!(worker.interval_seconds(), 1);
    assert!(ctx.sync.try_pop(SensorKind::Light).is_some());
}

#[tokio::test]
async fn disabled_sensor_is_not_read() {
    // Arrange
    let rig = Rig::new();
    let (ctx, mut parts) = rig.build(fast_config());
    let mut writer = parts.writer.take().expect("writer");
    let patch = ConfigPatch {
        enabled: Some(false),
        ..ConfigPatch::default()
    };
    writer.apply(SensorKind::Humidity, &patch, ConfigOrigin::Push);
    let mut worker = SamplingWorker::new(SensorKind::Humidity, ctx.clone());

    // Act
    let outcome = worker.sample_once().await;

    // Assert
    assert_eq!(outcome, SampleOutcome::Disabled);
    assert_eq!(rig.adc.reads(), 0);
    assert!(ctx.readings.is_empty());
}

#[tokio::test(start_paused = true)]
async fn transient_failure_is_retried_within_the_cycle() {
    // Arrange
    let rig = Rig::new();
    let (ctx, _parts) = rig.build(fast_config());
    let mut worker = SamplingWorker::new(SensorKind::Humidity, ctx.clone());
    rig.adc.fail_next(2);

    // Act
    let outcome = worker.sample_once().await;

    // Assert
    assert_eq!(outcome, SampleOutcome::Forwarded);
    assert_eq!(rig.adc.reads(), 3);
    assert_eq!(ctx.errors.pending_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn exhausted_retries_skip_the_reading_and_report() {
    // Arrange
    let rig = Rig::new();
    let (ctx, mut parts) = rig.build(fast_config());
    let mut pipeline = parts.pipeline.take().expect("pipeline");
    let mut worker = SamplingWorker::new(SensorKind::Humidity, ctx.clone());
    rig.adc.fail_next(3);
    go_online(&ctx);

    // Act
    let outcome = worker.sample_once().await;
    let sent = pipeline.cycle().await;

    // Assert
    assert_eq!(outcome, SampleOutcome::Failed);
    assert!(ctx.readings.is_empty());
    assert_eq!(sent, CycleOutcome::Sent);
    let posts = rig.http.posts();
    assert_eq!(posts.len(), 1);
    let body = &posts[0].1;
    assert_eq!(body["error_code"], SENSOR_READ_ERROR);
    assert_eq!(body["id_sensor"], 8);
    assert_eq!(body["device_serial"], "0x001C");
    assert_eq!(body["details"]["attempts"], 3);
    assert_eq!(body["details"]["channel"], 2);
}

#[tokio::test(start_paused = true)]
async fn running_worker_takes_interval_update_without_waiting_for_a_tick() {
    // Arrange
    let rig = Rig::new();
    let (ctx, _parts) = rig.build(fast_config());
    let worker = SamplingWorker::new(SensorKind::Light, ctx.clone());
    let task = tokio::spawn(worker.run(ctx.registry.register(WorkerKind::Sampling)));
    for _ in 0..5 {
        tokio::task::yield_now().await;
    }
    let reads_before = rig.adc.reads();

    // Act
    ctx.sync.push(ConfigUpdate {
        kind: SensorKind::Light,
        new_interval_seconds: 3,
        apply: true,
    });
    for _ in 0..5 {
        tokio::task::yield_now().await;
    }

    // Assert
    assert_eq!(reads_before, 1, "first tick fires immediately");
    assert_eq!(ctx.sync.try_pop(SensorKind::Light), None, "update consumed by the worker");
    assert_eq!(rig.adc.reads(), reads_before, "no extra read for the update");
    task.abort();
}
