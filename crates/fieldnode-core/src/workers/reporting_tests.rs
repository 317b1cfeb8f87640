use crate::config::CalibrationConfig;
use crate::sensor::{SensorKind, SensorReading};
use crate::sensor_config::ConfigOrigin;
use crate::test_support::{fast_config, Request, Rig};
use crate::workers::reporting::{reading_payload, response_patch, ReportOutcome, ReportingWorker};

fn reading(kind: SensorKind, raw: u16) -> SensorReading {
    SensorReading::new(kind, raw, 1611.7, &CalibrationConfig::default())
}

#[tokio::test]
async fn payload_carries_formatted_value_and_sensor_id() {
    // Act
    let payload = reading_payload(&reading(SensorKind::Humidity, 2000), 8, 12_345);

    // Assert
    assert_eq!(payload["value"], "50.0");
    assert_eq!(payload["unit"], "%");
    assert_eq!(payload["type"], "humidity");
    assert_eq!(payload["id_sensor"], 8);
    assert_eq!(payload["raw_value"], 2000);
    assert_eq!(payload["timestamp"], 12_345);
}

#[test]
fn response_patch_prefers_nested_sensor_config() {
    let patch = response_patch(r#"{"ok":true,"sensorConfig":{"interval_seconds":30,"state":"inactive"}}"#)
        .expect("patch present");

    assert_eq!(patch.interval_seconds, Some(30));
    assert_eq!(patch.enabled, Some(false));
}

#[test]
fn response_patch_accepts_root_interval_only() {
    let patch = response_patch(r#"{"interval_seconds":45,"state":"inactive"}"#).expect("patch present");

    assert_eq!(patch.interval_seconds, Some(45));
    assert_eq!(patch.enabled, None);
}

#[test]
fn response_without_configuration_yields_nothing() {
    assert_eq!(response_patch(r#"{"ok":true}"#), None);
    assert_eq!(response_patch("not json"), None);
    assert_eq!(response_patch(""), None);
}

#[tokio::test]
async fn delivered_reading_forwards_response_patch_to_ingest() {
    // Arrange
    let rig = Rig::new();
    let (ctx, mut parts) = rig.build(fast_config());
    let mut inbox = parts.patches.take().expect("patch inbox");
    rig.http.push_status(200, "{}");
    rig.http.push_status(201, r#"{"sensorConfig":{"interval_seconds":30}}"#);
    ctx.readings.push(reading(SensorKind::Humidity, 2000));
    let mut worker = ReportingWorker::new(ctx.clone());

    // Act
    let outcome = worker.step().await;

    // Assert
    assert_eq!(outcome, ReportOutcome::Sent);
    assert_eq!(worker.counts(), (1, 0));
    let requests = rig.http.requests();
    assert_eq!(
        requests[0],
        Request::Get("http://backend.test/api/v1/sensors/serial/0x001C".to_string())
    );
    let posts = rig.http.posts();
    assert_eq!(posts[0].0, "http://backend.test/api/v1/process-data");
    assert_eq!(posts[0].1["id_sensor"], 8);
    let request = inbox.try_recv().expect("patch forwarded");
    assert_eq!(request.kind, SensorKind::Humidity);
    assert_eq!(request.patch.interval_seconds, Some(30));
    assert_eq!(request.origin, ConfigOrigin::Backend);
}

#[tokio::test]
async fn serial_is_validated_once_per_sensor() {
    // Arrange
    let rig = Rig::new();
    let (ctx, _parts) = rig.build(fast_config());
    let mut worker = ReportingWorker::new(ctx.clone());

    // Act
    ctx.readings.push(reading(SensorKind::Light, 200));
    worker.step().await;
    ctx.readings.push(reading(SensorKind::Light, 300));
    worker.step().await;

    // Assert
    let gets = rig
        .http
        .requests()
        .into_iter()
        .filter(|request| matches!(request, Request::Get(_)))
        .count();
    assert_eq!(gets, 1);
    assert_eq!(rig.http.posts().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn failed_delivery_counts_toward_backoff_and_reports() {
    // Arrange
    let rig = Rig::new();
    let (ctx, _parts) = rig.build(fast_config());
    rig.http.push_status(200, "{}");
    rig.http.push_status(503, "");
    ctx.readings.push(reading(SensorKind::Humidity, 2000));
    let mut worker = ReportingWorker::new(ctx.clone());

    // Act
    let outcome = worker.step().await;

    // Assert
    assert_eq!(outcome, ReportOutcome::Failed);
    assert_eq!(worker.counts(), (0, 1));
    assert_eq!(ctx.backoff.state().consecutive_failures, 1);
    assert_eq!(ctx.errors.pending_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn success_after_failures_resets_backoff() {
    // Arrange
    let rig = Rig::new();
    let (ctx, _parts) = rig.build(fast_config());
    rig.http.push_status(200, "{}");
    rig.http.push_status(500, "");
    rig.http.push_status(500, "");
    let mut worker = ReportingWorker::new(ctx.clone());

    // Act
    for raw in [2000, 2100, 2200] {
        ctx.readings.push(reading(SensorKind::Humidity, raw));
        worker.step().await;
    }

    // Assert
    assert_eq!(worker.counts(), (1, 2));
    assert_eq!(ctx.backoff.state().consecutive_failures, 0);
    assert_eq!(ctx.backoff.stage(), 0);
}

#[tokio::test(start_paused = true)]
async fn no_reading_within_post_interval_is_idle() {
    // Arrange
    let rig = Rig::new();
    let (ctx, _parts) = rig.build(fast_config());
    let mut worker = ReportingWorker::new(ctx);

    // Act
    let outcome = worker.step().await;

    // Assert
    assert_eq!(outcome, ReportOutcome::Idle);
    assert!(rig.http.requests().is_empty());
}
