//! Execution path against the fake platform: retries, error classes,
//! cache keys, metrics and the language wrappers.

mod common;

use bouvet_sdk::{derive_cache_key, ExecutionIntent, ExecutionMode, SdkError};
use common::{client, client_with, init_tracing, spawn_platform, API_KEY};
use std::time::Duration;

#[tokio::test]
async fn test_execute_echoes_command() {
    init_tracing();
    let (url, platform) = spawn_platform().await;
    let client = client(&url);

    let result = client
        .execute(ExecutionIntent::new("echo hello"))
        .await
        .expect("execute");

    assert!(result.success());
    assert_eq!(result.stdout_text(), "echo hello");
    assert_eq!(result.duration, Duration::from_millis(120));
    assert_eq!(result.memory_usage, Some(1048576));
    assert!(result.snapshot.is_none());

    let sent = &platform.executions.lock().expect("lock")[0];
    assert_eq!(sent["request_id"].as_str(), Some(result.request_id.as_str()));
    assert_eq!(sent["image"], "alpine:latest");
    assert_eq!(sent["runtime"], "auto");
    assert_eq!(sent["mode"], "ephemeral");
}

#[tokio::test]
async fn test_retry_recovers_from_server_errors() {
    let (url, platform) = spawn_platform().await;
    let client = client(&url);
    platform.script(&[503, 502]);

    let result = client
        .execute(ExecutionIntent::new("echo retry"))
        .await
        .expect("third attempt succeeds");

    assert_eq!(result.stdout_text(), "echo retry");
    assert_eq!(platform.execute_calls(), 3);

    // Every attempt carries the same request id.
    let executions = platform.executions.lock().expect("lock");
    assert!(executions
        .iter()
        .all(|body| body["request_id"] == executions[0]["request_id"]));

    // One logical request, whatever the attempts.
    assert_eq!(client.metrics().total_requests(), 1);
    assert_eq!(client.metrics().errors(), 0);
}

#[tokio::test]
async fn test_retry_exhaustion_reports_attempts() {
    let (url, platform) = spawn_platform().await;
    let client = client(&url);
    platform.script(&[500, 500, 500, 500]);

    let err = client
        .execute(ExecutionIntent::new("echo never"))
        .await
        .expect_err("budget of 3 is exhausted");

    match err {
        SdkError::Server {
            status,
            attempts,
            body,
        } => {
            assert_eq!(status, 500);
            assert_eq!(attempts, 3);
            assert!(body.contains("scripted failure"));
        }
        other => panic!("expected server error, got {other:?}"),
    }
    assert_eq!(platform.execute_calls(), 3);
    assert_eq!(client.metrics().errors(), 1);
    assert_eq!(client.metrics().error_rate(), 1.0);
}

#[tokio::test]
async fn test_client_error_is_not_retried() {
    let (url, platform) = spawn_platform().await;
    let client = client(&url);
    platform.script(&[400]);

    let err = client
        .execute(ExecutionIntent::new("echo bad"))
        .await
        .expect_err("400 fails immediately");

    assert!(matches!(err, SdkError::Client { status: 400, .. }), "{err:?}");
    assert_eq!(platform.execute_calls(), 1);
}

#[tokio::test]
async fn test_timeout_is_not_retried() {
    let (url, platform) = spawn_platform().await;
    let client = client_with(&url, |b| b.request_timeout(Duration::from_millis(100)));

    let err = client
        .execute(ExecutionIntent::new("sleep 1"))
        .await
        .expect_err("platform is slower than the deadline");

    assert!(matches!(err, SdkError::Timeout(d) if d == Duration::from_millis(100)));
    assert_eq!(platform.execute_calls(), 1);
}

#[tokio::test]
async fn test_network_failure_retried_then_surfaced() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);
    let client = client(&format!("http://{addr}"));

    let err = client
        .execute(ExecutionIntent::new("echo unreachable"))
        .await
        .expect_err("nothing is listening");

    assert!(matches!(err, SdkError::Network { attempts: 3, .. }), "{err:?}");
}

#[tokio::test]
async fn test_wrong_api_key_is_client_error() {
    let (url, platform) = spawn_platform().await;
    let client = client_with(&url, |b| b.api_key("wrong"));

    let err = client
        .execute(ExecutionIntent::new("ls"))
        .await
        .expect_err("unauthorized");
    assert_eq!(err.status(), Some(401));

    let keys = platform.seen_keys.lock().expect("lock");
    assert_eq!(keys.as_slice(), &[Some("wrong".to_string())]);
}

#[tokio::test]
async fn test_api_key_sent_on_every_call() {
    let (url, platform) = spawn_platform().await;
    let client = client(&url);

    client.run("ls").await.expect("run");
    client.health_check().await.expect("health");
    client.list_branches().await.expect("branches");

    let keys = platform.seen_keys.lock().expect("lock");
    assert_eq!(keys.len(), 3);
    assert!(keys.iter().all(|k| k.as_deref() == Some(API_KEY)));
}

#[tokio::test]
async fn test_cache_key_and_hit_rate() {
    let (url, platform) = spawn_platform().await;
    let client = client(&url);
    assert_eq!(client.metrics().cache_hit_rate(), 0.0);

    let first = client
        .execute(ExecutionIntent::new("echo hello"))
        .await
        .expect("first");
    let second = client
        .execute(ExecutionIntent::new("echo hello"))
        .await
        .expect("second");

    let expected = derive_cache_key("echo hello", "alpine:latest");
    assert_eq!(expected.len(), 32);
    {
        let executions = platform.executions.lock().expect("lock");
        assert_eq!(executions[0]["cache_key"], expected.as_str());
        assert_eq!(executions[1]["cache_key"], expected.as_str());
    }

    assert!(!first.cache_hit());
    assert!(second.cache_hit());
    assert!(second.duration < first.duration);
    assert_eq!(client.metrics().cache_hit_rate(), 0.5);
}

#[tokio::test]
async fn test_caching_disabled_sends_no_key() {
    let (url, platform) = spawn_platform().await;
    let client = client_with(&url, |b| b.cache_enabled(false));

    client.run("echo hello").await.expect("run");
    client.run("echo hello").await.expect("run");

    let executions = platform.executions.lock().expect("lock");
    assert!(executions.iter().all(|body| body.get("cache_key").is_none()));
    assert_eq!(client.metrics().cache_hits(), 0);
}

#[tokio::test]
async fn test_mode_helpers() {
    let (url, platform) = spawn_platform().await;
    let client = client(&url);

    let cached = client.execute_cached("make deps").await.expect("cached");
    let checkpointed = client
        .execute_checkpointed("make build", cached.snapshot.as_deref())
        .await
        .expect("checkpointed");
    let branched = client
        .execute_branched("make test", checkpointed.snapshot.as_deref().expect("snapshot"))
        .await
        .expect("branched");

    assert_eq!(cached.snapshot.as_deref(), Some("snap-1"));
    assert_eq!(checkpointed.snapshot.as_deref(), Some("snap-2"));
    assert_eq!(branched.snapshot.as_deref(), Some("snap-3"));

    let executions = platform.executions.lock().expect("lock");
    assert_eq!(executions[0]["mode"], "cached");
    assert_eq!(executions[1]["mode"], "checkpointed");
    assert_eq!(executions[1]["checkpoint_id"], "snap-1");
    assert_eq!(executions[2]["mode"], "branched");
    assert_eq!(executions[2]["branch_from"], "snap-2");
}

#[tokio::test]
async fn test_fork_execution_is_single_attempt() {
    let (url, platform) = spawn_platform().await;
    let client = client(&url);

    let child = client
        .fork_execution("exec-parent", "echo child")
        .await
        .expect("fork");
    assert_eq!(child.snapshot.as_deref(), Some("snap-1"));
    {
        let executions = platform.executions.lock().expect("lock");
        assert_eq!(executions[0]["mode"], "branched");
        assert_eq!(executions[0]["branch_from"], "exec-parent");
    }

    platform.script(&[503]);
    let err = client
        .fork_execution("exec-parent", "echo child")
        .await
        .expect_err("no retry");
    assert!(matches!(err, SdkError::Server { attempts: 1, .. }), "{err:?}");
    assert_eq!(platform.execute_calls(), 2);
    assert_eq!(client.metrics().total_requests(), 2);
}

#[tokio::test]
async fn test_language_wrappers_quote_payloads() {
    let (url, platform) = spawn_platform().await;
    let client = client(&url);

    client
        .run_python("print('it''s')\nprint(\"$HOME\")")
        .await
        .expect("python");
    client
        .run_javascript("console.log(`a ${1}`)")
        .await
        .expect("js");
    client.run_as_script("echo 'x' | tr x y").await.expect("script");

    let executions = platform.executions.lock().expect("lock");
    assert_eq!(executions[0]["image"], "python:3.11-slim");
    assert_eq!(
        executions[0]["command"],
        "python3 -c 'print('\\''it'\\'''\\''s'\\'')\nprint(\"$HOME\")'"
    );
    assert_eq!(executions[1]["image"], "node:20-slim");
    assert_eq!(executions[1]["command"], "node -e 'console.log(`a ${1}`)'");
    assert_eq!(executions[2]["image"], "alpine:latest");
    assert_eq!(executions[2]["command"], "sh -c 'echo '\\''x'\\'' | tr x y'");
}

#[tokio::test]
async fn test_nul_payload_rejected_before_network() {
    let (url, platform) = spawn_platform().await;
    let client = client(&url);

    let err = client.run_python("a\0b").await.expect_err("NUL");
    assert!(matches!(err, SdkError::InvalidRequest(_)));
    assert_eq!(platform.execute_calls(), 0);
}

#[tokio::test]
async fn test_intent_fields_reach_the_wire() {
    let (url, platform) = spawn_platform().await;
    let client = client(&url);

    client
        .execute(
            ExecutionIntent::new("python3 train.py")
                .image("python:3.11-slim")
                .mode(ExecutionMode::Persistent)
                .env("EPOCHS", "3")
                .working_dir("/work")
                .timeout(Duration::from_secs(90))
                .memory_mb(1024)
                .cpu_cores(2)
                .cache_key("train-v1"),
        )
        .await
        .expect("execute");

    let body = &platform.executions.lock().expect("lock")[0];
    assert_eq!(body["mode"], "persistent");
    assert_eq!(body["env_vars"][0][0], "EPOCHS");
    assert_eq!(body["working_dir"], "/work");
    assert_eq!(body["timeout_ms"], 90000);
    assert_eq!(body["memory_mb"], 1024);
    assert_eq!(body["cpu_cores"], 2);
    assert_eq!(body["cache_key"], "train-v1");
}
