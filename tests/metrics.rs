//! Tests for the metrics module.

use std::rc::Rc;
use telemetry_window::config::MultiplexerConfig;
use telemetry_window::descriptor::{SubscriptionDataKey, SubscriptionDescriptor, SubscriptionKind};
use telemetry_window::functions::FunctionRegistry;
use telemetry_window::metrics::{CounterMetric, GaugeMetric, MetricsCollector, names};
use telemetry_window::multiplexer::SubscriptionRegistry;
use telemetry_window::scheduler::ManualScheduler;
use telemetry_window::testing::{BatchBuilder, MockTransport, RecordingListener};
use serde_json::json;


#[test]
fn test_counter_metric() {
    let collector = MetricsCollector::new();
    collector.register(Box::new(CounterMetric::with_value("test_counter", 5)));

    let snapshot = collector.snapshot();
    assert_eq!(snapshot.get("test_counter").unwrap(), &json!(5));
    assert_eq!(collector.counter("test_counter"), 5);
}

#[test]
fn test_gauge_metric() {
    let collector = MetricsCollector::new();
    collector.register(Box::new(GaugeMetric::new("test_gauge", 42.5).with_description("Test gauge")));

    let snapshot = collector.snapshot();
    assert_eq!(snapshot.get("test_gauge").unwrap(), &json!(42.5));
    assert_approx_eq!(collector.gauge("test_gauge").unwrap(), 42.5);
}

#[test]
fn test_increment_counter() {
    let collector = MetricsCollector::new();
    collector.increment_counter("requests", 1);
    collector.increment_counter("requests", 5);

    assert_eq!(collector.counter("requests"), 6);
    assert_eq!(collector.counter("never_touched"), 0);
}

#[test]
fn test_set_counter() {
    let collector = MetricsCollector::new();
    collector.set_counter("operations", 100);
    assert_eq!(collector.counter("operations"), 100);

    // Overwrite with new value
    collector.set_counter("operations", 200);
    assert_eq!(collector.snapshot().get("operations").unwrap(), &json!(200));
}

#[test]
fn test_set_gauge_updates_in_place() {
    let collector = MetricsCollector::new();
    collector.set_gauge("active", 3.0);
    collector.set_gauge("active", 1.0);
    assert_eq!(collector.gauge("active"), Some(1.0));
    assert_eq!(collector.counter("active"), 0, "a gauge is not a counter");
}

#[test]
fn test_to_json_includes_descriptions() {
    let collector = MetricsCollector::new();
    collector.increment_counter("c", 2);
    collector.register(Box::new(GaugeMetric::new("g", 1.5).with_description("queue depth")));

    let json = collector.to_json();
    assert_eq!(json["c"]["value"], json!(2));
    assert_eq!(json["g"]["value"], json!(1.5));
    assert_eq!(json["g"]["description"], json!("queue depth"));
    assert!(json["c"].get("description").is_none());
}

#[test]
fn test_clones_share_counters() {
    let collector = MetricsCollector::new();
    let clone = collector.clone();
    clone.increment_counter("shared", 3);
    assert_eq!(collector.counter("shared"), 3);
}

#[test]
fn test_registry_reports_listener_updates() {
    let transport = Rc::new(MockTransport::new());
    let scheduler = Rc::new(ManualScheduler::new(0));
    let metrics = MetricsCollector::new();
    let registry = SubscriptionRegistry::with_metrics(
        transport.clone(),
        scheduler,
        FunctionRegistry::new(),
        MultiplexerConfig::default(),
        metrics.clone(),
    )
    .unwrap();
    let descriptor = SubscriptionDescriptor::entity(
        "DEVICE",
        "dev-1",
        vec![SubscriptionDataKey::timeseries("t")],
        SubscriptionKind::Latest,
        None,
    );
    registry.subscribe(RecordingListener::new(descriptor.clone(), 0)).unwrap();
    registry.subscribe(RecordingListener::new(descriptor, 0)).unwrap();

    let cmd_id = transport.last_command_id().unwrap();
    transport.deliver(cmd_id, BatchBuilder::new().sample("t", 1, 1.0).build());

    // one replay to the late joiner, then one update per listener
    assert_eq!(metrics.counter(names::LISTENER_UPDATES), 3);
    assert_eq!(metrics.counter(names::UPSTREAM_SUBSCRIPTIONS_CREATED), 1);
    assert_eq!(metrics.gauge(names::ACTIVE_SUBSCRIPTIONS), Some(1.0));
}
