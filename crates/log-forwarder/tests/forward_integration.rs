// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use mockito::{Matcher, Server};
use serde_json::{json, Value};
use std::io::{Read, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

use log_forwarder::batch::Batch;
use log_forwarder::config::{ForwarderConfig, ObjectStoreConfig, OutputMode};
use log_forwarder::error::{ForwarderError, SinkError};
use log_forwarder::forwarder::Forwarder;
use log_forwarder::retriever::{DefaultRetrieverFactory, LocalObjectStore, ObjectStore};
use log_forwarder::routing::{DestinationTable, RoutingInfo, SinkCredentials};
use log_forwarder::sink::{Sink, SinkFactory};

const ALB_LINE_WITHOUT_CLASSIFICATION: &str = "https 2018-07-02T22:23:00.186641Z app/my-loadbalancer/50dc6c495c0c9188 192.168.131.39:2817 10.0.0.1:80 0.086 0.048 0.037 200 200 0 57 \"GET https://www.example.com:443/ HTTP/1.1\" \"curl/7.46.0\" ECDHE-RSA-AES128-GCM-SHA256 TLSv1.2 arn:aws:elasticloadbalancing:us-east-2:123456789012:targetgroup/my-targets/73e2d6bc24d8a067 \"Root=1-58337281-1d84f3d73c47ec4e58577259\" \"www.example.com\" \"arn:aws:acm:us-east-2:123456789012:certificate/12345678-1234-1234-1234-123456789012\" 1 2018-07-02T22:22:48.364000Z \"authenticate,forward\" \"-\" \"-\" \"10.0.0.1:80\" \"200\"";

#[derive(Default)]
struct RecordingSinks {
    created: Mutex<Vec<RoutingInfo>>,
    sent: Arc<Mutex<Vec<Batch>>>,
}

struct RecordingSink {
    sent: Arc<Mutex<Vec<Batch>>>,
}

#[async_trait]
impl Sink for RecordingSink {
    async fn send(&self, batch: &Batch) -> Result<(), SinkError> {
        self.sent.lock().unwrap().push(batch.clone());
        Ok(())
    }
}

impl SinkFactory for RecordingSinks {
    fn create(&self, routing: &RoutingInfo) -> Result<Box<dyn Sink>, SinkError> {
        self.created.lock().unwrap().push(routing.clone());
        Ok(Box::new(RecordingSink {
            sent: Arc::clone(&self.sent),
        }))
    }
}

impl RecordingSinks {
    fn batch_sizes(&self) -> Vec<usize> {
        self.sent.lock().unwrap().iter().map(Batch::len).collect()
    }

    fn created(&self) -> usize {
        self.created.lock().unwrap().len()
    }
}

struct Harness {
    store_dir: tempfile::TempDir,
    sinks: Arc<RecordingSinks>,
    forwarder: Forwarder,
}

fn harness(destinations: Value, max_batch_size: usize) -> Harness {
    let store_dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn ObjectStore> = Arc::new(LocalObjectStore::new(store_dir.path()));
    let routing = DestinationTable::new(
        serde_json::from_value(destinations).unwrap(),
        Some("default".to_string()),
        max_batch_size,
        SinkCredentials {
            endpoint: "http://unused".to_string(),
            api_key: "secret".to_string(),
        },
    );
    let sinks = Arc::new(RecordingSinks::default());
    let forwarder = Forwarder::new(
        Arc::new(DefaultRetrieverFactory::new(Some(store))),
        Arc::new(routing),
        sinks.clone(),
    );
    Harness {
        store_dir,
        sinks,
        forwarder,
    }
}

fn put_object(root: &Path, container: &str, key: &str, content: &str) {
    let path = root.join(container).join(key);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}

fn storage_event(container: &str, keys: &[&str]) -> Value {
    let records: Vec<Value> = keys
        .iter()
        .map(|key| json!({"s3": {"bucket": {"name": container}, "object": {"key": key}}}))
        .collect();
    json!({ "Records": records })
}

#[tokio::test]
async fn test_three_lines_produce_two_sends() {
    let h = harness(json!([{"prefix": "logs/", "log_type": "unknown"}]), 150);
    let lines = ["a".repeat(100), "b".repeat(100), "c".repeat(100)];
    put_object(h.store_dir.path(), "logs", "app.log", &format!("{}\n", lines.join("\n")));

    let summary = h
        .forwarder
        .forward_logs(storage_event("logs", &["app.log"]))
        .await
        .unwrap();

    assert_eq!(h.sinks.batch_sizes(), vec![2, 1]);
    assert_eq!(summary.batches, 2);
    assert_eq!(summary.lines, 3);
    let sent = h.sinks.sent.lock().unwrap();
    let (key, sequence) = sent[0].id().rsplit_once('#').unwrap();
    assert!(key.starts_with("logs/app.log@"));
    assert_eq!(sequence, "0");
    assert_eq!(sent[1].id(), format!("{key}#1"));
}

#[tokio::test]
async fn test_absent_format_abandons_item() {
    let h = harness(json!([{"prefix": "other/", "log_type": "alb_access_log"}]), 150);
    put_object(h.store_dir.path(), "logs", "app.log", "line\n");

    let summary = h
        .forwarder
        .forward_logs(storage_event("logs", &["app.log"]))
        .await
        .unwrap();

    assert_eq!(summary.abandoned, 1);
    assert_eq!(summary.processed, 0);
    assert_eq!(summary.lines, 0);
    assert_eq!(h.sinks.created(), 0);
    assert!(h.sinks.batch_sizes().is_empty());
}

#[tokio::test]
async fn test_abandoned_item_does_not_stop_the_event() {
    let h = harness(
        json!([{"prefix": "logs/keep/", "log_type": "cloudtrail_log"}]),
        1_024,
    );
    put_object(h.store_dir.path(), "logs", "skip/a.log", "dropped\n");
    put_object(
        h.store_dir.path(),
        "logs",
        "keep/b.json",
        r#"{"Records":[{"eventName":"PutObject"},{"eventName":"GetObject"}]}"#,
    );

    let summary = h
        .forwarder
        .forward_logs(storage_event("logs", &["skip/a.log", "keep/b.json"]))
        .await
        .unwrap();

    assert_eq!(summary.abandoned, 1);
    assert_eq!(summary.processed, 1);
    let sent = h.sinks.sent.lock().unwrap();
    assert_eq!(
        sent[0].records(),
        &[
            r#"{"eventName":"PutObject"}"#.to_string(),
            r#"{"eventName":"GetObject"}"#.to_string()
        ]
    );
}

#[tokio::test]
async fn test_alb_line_without_classification_is_structured() {
    let h = harness(json!([{"prefix": "logs/alb/", "log_name": "edge", "log_type": "alb_access_log"}]), 1_024);
    put_object(
        h.store_dir.path(),
        "logs",
        "alb/file.log",
        &format!("{ALB_LINE_WITHOUT_CLASSIFICATION}\n"),
    );

    h.forwarder
        .forward_logs(storage_event("logs", &["alb/file.log"]))
        .await
        .unwrap();

    let created = h.sinks.created.lock().unwrap();
    assert_eq!(created[0].log_name, "edge");
    assert_eq!(created[0].log_set.as_deref(), Some("default"));

    let sent = h.sinks.sent.lock().unwrap();
    let record: Value = serde_json::from_str(&sent[0].records()[0]).unwrap();
    assert_eq!(record["elb"], "app/my-loadbalancer/50dc6c495c0c9188");
    assert_eq!(record["target_status_code_list"], "200");
    assert_eq!(record["classification"], Value::Null);
    assert_eq!(record["classification_reason"], Value::Null);
    assert!(record.as_object().unwrap().contains_key("classification"));
}

#[tokio::test]
async fn test_unrecognized_envelope_is_not_an_error() {
    let h = harness(json!([{"prefix": "", "log_type": "unknown"}]), 1_024);

    let summary = h
        .forwarder
        .forward_logs(json!({"version": "0", "source": "aws.ec2", "detail": {"state": "running"}}))
        .await
        .unwrap();

    assert!(summary.aborted);
    assert_eq!(summary.processed, 0);
    assert_eq!(h.sinks.created(), 0);
}

#[tokio::test]
async fn test_unrecognized_item_stops_remaining_items() {
    let h = harness(json!([{"prefix": "", "log_type": "unknown"}]), 1_024);
    put_object(h.store_dir.path(), "logs", "a.log", "first\n");
    put_object(h.store_dir.path(), "logs", "b.log", "second\n");

    let event = json!({"Records": [
        {"s3": {"bucket": {"name": "logs"}, "object": {"key": "a.log"}}},
        {"eventSource": "aws:sqs", "body": "{}"},
        {"s3": {"bucket": {"name": "logs"}, "object": {"key": "b.log"}}}
    ]});
    let summary = h.forwarder.forward_logs(event).await.unwrap();

    assert!(summary.aborted);
    assert_eq!(summary.processed, 1);
    assert_eq!(h.sinks.batch_sizes(), vec![1]);
}

#[tokio::test]
async fn test_bridged_event_is_processed() {
    let h = harness(json!([{"prefix": "logs/", "log_type": "unknown"}]), 1_024);
    put_object(h.store_dir.path(), "logs", "dir/my file.log", "hello\n");

    let summary = h
        .forwarder
        .forward_logs(json!({
            "source": "aws.s3",
            "detail-type": "Object Created",
            "detail": {"bucket": {"name": "logs"}, "object": {"key": "dir/my+file.log"}}
        }))
        .await
        .unwrap();

    assert_eq!(summary.processed, 1);
    assert_eq!(h.sinks.sent.lock().unwrap()[0].records(), &["hello".to_string()]);
}

#[tokio::test]
async fn test_empty_artifact_sends_nothing() {
    let h = harness(json!([{"prefix": "", "log_type": "s3_access_log"}]), 1_024);
    put_object(h.store_dir.path(), "logs", "empty.log", "");

    let summary = h
        .forwarder
        .forward_logs(storage_event("logs", &["empty.log"]))
        .await
        .unwrap();

    assert_eq!(summary.processed, 1);
    assert_eq!(h.sinks.created(), 1);
    assert!(h.sinks.batch_sizes().is_empty());
}

#[tokio::test]
async fn test_missing_object_is_a_hard_error() {
    let h = harness(json!([{"prefix": "", "log_type": "unknown"}]), 1_024);

    let result = h
        .forwarder
        .forward_logs(storage_event("logs", &["missing.log"]))
        .await;

    assert!(matches!(result, Err(ForwarderError::Fetch { .. })));
}

fn streamed_forwarder(sinks: Arc<RecordingSinks>) -> Forwarder {
    let routing = DestinationTable::new(
        serde_json::from_value(json!([{"prefix": "/aws/lambda/", "log_type": "cloudwatch_log"}]))
            .unwrap(),
        None,
        1_024,
        SinkCredentials {
            endpoint: "http://unused".to_string(),
            api_key: "secret".to_string(),
        },
    );
    Forwarder::new(
        Arc::new(DefaultRetrieverFactory::default()),
        Arc::new(routing),
        sinks,
    )
}

fn log_group_event(payload: &Value) -> Value {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(payload.to_string().as_bytes()).unwrap();
    json!({"awslogs": {"data": STANDARD.encode(encoder.finish().unwrap())}})
}

#[tokio::test]
async fn test_streamed_log_group() {
    let sinks = Arc::new(RecordingSinks::default());
    let forwarder = streamed_forwarder(sinks.clone());

    let payload = json!({
        "messageType": "DATA_MESSAGE",
        "logGroup": "/aws/lambda/checkout",
        "logStream": "stream",
        "logEvents": [
            {"id": "1", "timestamp": 1, "message": "START RequestId: 1"},
            {"id": "2", "timestamp": 2, "message": "END RequestId: 1\n"}
        ]
    });
    let summary = forwarder.forward_logs(log_group_event(&payload)).await.unwrap();

    assert_eq!(summary.lines, 2);
    let created = sinks.created.lock().unwrap();
    assert_eq!(created[0].log_name, "/aws/lambda/checkout");
    let sent = sinks.sent.lock().unwrap();
    assert_eq!(
        sent[0].records(),
        &["START RequestId: 1".to_string(), "END RequestId: 1".to_string()]
    );
}

#[tokio::test]
async fn test_deliveries_from_one_log_group_have_distinct_batch_ids() {
    let sinks = Arc::new(RecordingSinks::default());
    let forwarder = streamed_forwarder(sinks.clone());

    for (stream, id, message) in [
        ("s1", "100", "first delivery"),
        ("s2", "200", "second delivery"),
        ("s1", "100", "first delivery"),
    ] {
        let payload = json!({
            "messageType": "DATA_MESSAGE",
            "logGroup": "/aws/lambda/x",
            "logStream": stream,
            "logEvents": [{"id": id, "timestamp": 1, "message": message}]
        });
        forwarder.forward_logs(log_group_event(&payload)).await.unwrap();
    }

    let sent = sinks.sent.lock().unwrap();
    assert_eq!(sent.len(), 3);
    assert_eq!(sent[0].records(), &["first delivery".to_string()]);
    assert_eq!(sent[1].records(), &["second delivery".to_string()]);
    assert!(sent[0].id().starts_with("/aws/lambda/x@"));
    assert!(sent[0].id().ends_with("#0"));
    assert_ne!(sent[0].id(), sent[1].id());
    // A redelivery of identical content keeps its identifier.
    assert_eq!(sent[0].id(), sent[2].id());
}

#[tokio::test]
async fn test_file_output_writes_side_artifact() {
    let h = harness(json!([{"prefix": "", "log_type": "alb_access_log"}]), 1_024);
    let work_dir = tempfile::tempdir().unwrap();
    put_object(
        h.store_dir.path(),
        "logs",
        "alb/file.log",
        &format!("{ALB_LINE_WITHOUT_CLASSIFICATION}\nnot an alb line\n"),
    );

    let forwarder = h
        .forwarder
        .with_output(OutputMode::File)
        .with_work_dir(Some(work_dir.path().to_path_buf()));
    let summary = forwarder
        .forward_logs(storage_event("logs", &["alb/file.log"]))
        .await
        .unwrap();

    assert_eq!(summary.lines, 2);
    assert_eq!(h.sinks.created(), 0);

    let parsed = work_dir.path().join("logs/alb/parsed_file.log.gz");
    let mut content = String::new();
    GzDecoder::new(std::fs::File::open(parsed).unwrap())
        .read_to_string(&mut content)
        .unwrap();
    let lines: Vec<&str> = content.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(serde_json::from_str::<Value>(lines[0]).unwrap().is_object());
    assert_eq!(lines[1], "not an alb line");
}

fn http_config(server: &Server, store_dir: &Path) -> ForwarderConfig {
    ForwarderConfig {
        endpoint: Some(format!("{}/logs", server.url())),
        api_key: Some("secret".to_string()),
        max_batch_size: 1_024,
        use_compression: false,
        destinations: serde_json::from_value(
            json!([{"prefix": "logs/", "log_name": "app", "log_set": "prod", "log_type": "unknown"}]),
        )
        .unwrap(),
        object_store: Some(ObjectStoreConfig::Local(store_dir.to_path_buf())),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_forward_over_http() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/logs")
        .match_header("x-api-key", "secret")
        .match_header("x-log-name", "app")
        .match_header("x-log-set", "prod")
        .match_header(
            "x-batch-id",
            Matcher::Regex(r"^logs/app\.log@[0-9a-f]{16}#0$".to_string()),
        )
        .match_body("first\nsecond\n")
        .with_status(202)
        .expect(1)
        .create_async()
        .await;

    let store_dir = tempfile::tempdir().unwrap();
    put_object(store_dir.path(), "logs", "app.log", "first\nsecond\n");
    let config = http_config(&server, store_dir.path());

    let forwarder = Forwarder::from_config(&config, reqwest::Client::new());
    let summary = forwarder
        .forward_logs(storage_event("logs", &["app.log"]))
        .await
        .unwrap();

    assert_eq!(summary.batches, 1);
    mock.assert_async().await;
}

#[tokio::test]
async fn test_sink_failure_fails_the_invocation() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/logs")
        .with_status(503)
        .expect(3)
        .create_async()
        .await;

    let store_dir = tempfile::tempdir().unwrap();
    put_object(store_dir.path(), "logs", "app.log", "first\n");
    let config = http_config(&server, store_dir.path());

    let forwarder = Forwarder::from_config(&config, reqwest::Client::new());
    let result = forwarder
        .forward_logs(storage_event("logs", &["app.log"]))
        .await;

    assert!(matches!(
        result,
        Err(ForwarderError::Sink(SinkError::Transport { attempts: 3, .. }))
    ));
    mock.assert_async().await;
}
