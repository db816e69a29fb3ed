use async_trait::async_trait;
use rand::seq::SliceRandom;
use rand::Rng;
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use std::io;
use std::sync::Mutex;
use zentinel_deprecation_warnings::context::{self, spawn_child};
use zentinel_deprecation_warnings::error::Result;
use zentinel_deprecation_warnings::fanout::{scatter_gather, ShardHandler, ShardTarget};
use zentinel_deprecation_warnings::server::{
    WarningServer, DEPRECATED_ENDPOINT, DEPRECATED_SETTINGS_PATH, DEPRECATED_USAGE,
};
use zentinel_deprecation_warnings::settings::{Setting, Settings, SettingsRegistry};
use zentinel_deprecation_warnings::{emit, DeprecationLogger, WarningConfig, WarningPipeline};

fn pipeline() -> WarningPipeline {
    WarningPipeline::from_yaml("log_deprecations: false").unwrap()
}

fn quiet_settings() -> Settings {
    Settings::new()
        .put("test.setting.deprecated.true1", true)
        .put("test.setting.deprecated.true2", true)
        .put("test.setting.not_deprecated", true)
        .with_logger(DeprecationLogger::new("settings").with_logging(false))
}

fn test_settings() -> Vec<Setting<bool>> {
    vec![
        Setting::new("test.setting.deprecated.true1", false).deprecated(),
        Setting::new("test.setting.deprecated.true2", false).deprecated(),
        Setting::new("test.setting.not_deprecated", false),
    ]
}

/// Index-level sub-request that deprecates uniquely by index name.
struct IndexQuery;

#[async_trait]
impl ShardHandler for IndexQuery {
    async fn handle(&self, target: &ShardTarget) -> Result<Value> {
        let delay = u64::from(target.shard);
        tokio::time::sleep(Duration::from_millis(delay)).await;
        emit("[{}] index", &[&target.index]);
        Ok(Value::Null)
    }
}

#[derive(Clone, Default)]
struct CapturedLog(Arc<Mutex<Vec<u8>>>);

impl io::Write for CapturedLog {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[test]
fn emit_outside_request_is_silent() {
    let log = CapturedLog::default();
    let writer = log.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .finish();

    tracing::subscriber::with_default(subscriber, || {
        emit("[{}] setting was deprecated", &[&"startup.key"]);
        emit("plain startup deprecation", &[]);
    });

    let output = String::from_utf8_lossy(&log.0.lock().unwrap()).into_owned();
    assert!(output.is_empty(), "unexpected log output: {output}");
    assert!(!context::is_active());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn repeated_emissions_collapse_to_one_header() {
    let pipeline = pipeline();
    let response = pipeline
        .handle(async {
            let children: Vec<_> = (0..10)
                .map(|_| {
                    spawn_child(async { emit("[{}] setting was deprecated", &[&"same.key"]) })
                })
                .collect();
            for child in children {
                child.await.unwrap();
            }
            emit("[{}] setting was deprecated", &[&"same.key"]);
        })
        .await
        .unwrap();

    assert_eq!(response.warnings(), vec!["[same.key] setting was deprecated"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn unique_deprecations_merge_across_sub_requests() {
    let (indices, targets) = {
        let mut rng = rand::thread_rng();
        let count = rng.gen_range(2..=5);
        let indices: Vec<String> = (0..count).map(|i| format!("test{}", i)).collect();
        let mut targets: Vec<ShardTarget> = indices
            .iter()
            .map(|index| ShardTarget::new(index.clone(), rng.gen_range(0..20)))
            .collect();
        targets.shuffle(&mut rng);
        (indices, targets)
    };

    let pipeline = pipeline();
    let response = pipeline
        .handle(scatter_gather(Arc::new(IndexQuery), targets))
        .await
        .unwrap();

    assert!(response.body.iter().all(|o| o.is_ok()));
    let warnings = response.warnings();
    assert_eq!(warnings.len(), indices.len());
    for index in &indices {
        assert!(warnings.contains(&format!("[{}] index", index)));
    }
}

fn settings_server() -> WarningServer {
    let config = WarningConfig {
        log_deprecations: false,
        ..WarningConfig::default()
    };
    let mut registry = SettingsRegistry::new();
    for setting in test_settings() {
        registry.register(&setting);
    }
    let pipeline = Arc::new(WarningPipeline::new(config).unwrap());
    WarningServer::new(pipeline, quiet_settings(), registry)
}

/// Run a request that receives a randomized set of deprecation warnings.
async fn deprecation_warnings_appear_in_headers(server: &WarningServer) {
    let (settings_to_read, use_deprecated_field) = {
        let mut rng = rand::thread_rng();
        let all = test_settings();
        let mut chosen = vec![all[0].clone()];
        if rng.gen_bool(0.5) {
            chosen.push(all[1].clone());
        }
        if rng.gen_bool(0.5) {
            chosen.push(all[2].clone());
        }
        chosen.shuffle(&mut rng);
        (chosen, rng.gen_bool(0.5))
    };

    let field = if use_deprecated_field {
        "deprecated_settings"
    } else {
        "settings"
    };
    let keys: Vec<&str> = settings_to_read.iter().map(|s| s.key()).collect();
    let body = serde_json::json!({ field: keys }).to_string();

    let response = server
        .route("POST", DEPRECATED_SETTINGS_PATH, body.as_bytes())
        .await
        .unwrap();
    assert_eq!(response.body.0, 200);
    for key in &keys {
        assert_eq!(response.body.1[*key], "true");
    }

    let mut expected = vec![DEPRECATED_ENDPOINT.to_string()];
    if use_deprecated_field {
        expected.push(DEPRECATED_USAGE.to_string());
    }
    let expected_settings: Vec<&str> = settings_to_read
        .iter()
        .filter(|s| s.is_deprecated())
        .map(|s| s.key())
        .collect();

    let warnings = response.warnings();
    assert_eq!(warnings.len(), expected.len() + expected_settings.len());
    for message in &expected {
        assert!(warnings.contains(message), "missing {message}");
    }
    for key in expected_settings {
        let needle = format!("[{}] setting was deprecated", key);
        assert!(warnings.iter().any(|w| w.contains(&needle)), "missing {needle}");
    }
    assert!(!warnings.iter().any(|w| w.contains("not_deprecated")));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn deprecation_warnings_appear_in_headers_test() {
    deprecation_warnings_appear_in_headers(&settings_server()).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn deprecation_headers_do_not_get_stuck() {
    let server = settings_server();
    let runs = if rand::thread_rng().gen_ratio(1, 10) { 3 } else { 2 };
    for _ in 0..runs {
        deprecation_warnings_appear_in_headers(&server).await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn deprecated_settings_read_in_sub_requests_merge() {
    let pipeline = pipeline();
    let settings = quiet_settings();
    let response = pipeline
        .handle(async {
            let reads: Vec<_> = test_settings()
                .into_iter()
                .map(|setting| {
                    let settings = settings.clone();
                    spawn_child(async move { setting.get(&settings) })
                })
                .collect();
            for read in reads {
                assert!(read.await.unwrap().unwrap());
            }
        })
        .await
        .unwrap();

    let warnings = response.warnings();
    assert_eq!(warnings.len(), 2);
    assert!(warnings.iter().all(|w| w.contains(".deprecated.true")));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_requests_stay_isolated() {
    let pipeline = Arc::new(pipeline());

    let requests: Vec<_> = (0..32)
        .map(|i| {
            let pipeline = Arc::clone(&pipeline);
            tokio::spawn(async move {
                let response = pipeline
                    .handle(async move {
                        let shards: Vec<_> = (0..3)
                            .map(|shard| {
                                spawn_child(async move {
                                    tokio::task::yield_now().await;
                                    emit("request {} shard {}", &[&i, &shard]);
                                })
                            })
                            .collect();
                        for shard in shards {
                            shard.await.unwrap();
                        }
                    })
                    .await
                    .unwrap();
                (i, response.warnings())
            })
        })
        .collect();

    for request in requests {
        let (i, warnings) = request.await.unwrap();
        let expected: BTreeSet<String> = (0..3)
            .map(|s| format!("request {} shard {}", i, s))
            .collect();
        let actual: BTreeSet<String> = warnings.into_iter().collect();
        assert_eq!(actual, expected);
    }
}

#[tokio::test(flavor = "current_thread")]
async fn reused_worker_after_failed_request_is_clean() {
    let pipeline = pipeline();

    let failed = pipeline
        .handle_with_timeout(Duration::from_millis(10), async {
            emit("from the aborted request", &[]);
            std::future::pending::<()>().await;
        })
        .await
        .unwrap();
    assert!(failed.body.is_err());
    assert_eq!(failed.warnings(), vec!["from the aborted request"]);
    assert!(!context::is_active());

    let next = pipeline
        .handle(async { emit("from the next request", &[]) })
        .await
        .unwrap();
    assert_eq!(next.warnings(), vec!["from the next request"]);
}

#[test]
fn drain_is_repeatable_before_end() {
    let scope = context::begin_request().unwrap();
    scope.run_blocking(|| {
        emit("[{}] setting was deprecated", &[&"a"]);
        emit("[{}] setting was deprecated", &[&"b"]);
    });

    let first = scope.store().drain();
    let second = scope.store().drain();
    assert_eq!(first, second);
    assert_eq!(first.len(), 2);
    scope.end();
    assert!(scope.store().is_closed());
}
