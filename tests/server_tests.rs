use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};

use actix_web::{App, test, web};
use assert_json_diff::{assert_json_eq, assert_json_include};
use serde_json::json;

use coderun::config::{ByteSize, EngineConfig, MicroSecond};
use coderun::engine::Engine;
use coderun::engine::profile::{LanguageProfile, LanguageTable, ProfileKind, SourceName};
use coderun::routes::{configure, json_error_handler};

// Global counter to ensure unique workspace roots
static TEST_ROOT_COUNTER: AtomicU32 = AtomicU32::new(0);

fn unique_root() -> PathBuf {
    let test_id = TEST_ROOT_COUNTER.fetch_add(1, Ordering::SeqCst);
    std::env::temp_dir().join(format!(
        "coderun_server_test_{}_{}",
        std::process::id(),
        test_id
    ))
}

// Test guard that ensures cleanup on drop
struct TestRootGuard {
    root: PathBuf,
}

impl TestRootGuard {
    fn new(root: PathBuf) -> Self {
        Self { root }
    }
}

impl Drop for TestRootGuard {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.root);
        let _ = fs::remove_file(&self.root);
    }
}

fn ghost_profile() -> LanguageProfile {
    LanguageProfile {
        name: "ghost".to_string(),
        aliases: vec!["spooky".to_string()],
        kind: ProfileKind::Toolchain,
        source: SourceName::Fixed {
            file_name: "main.ghost".to_string(),
        },
        compile: None,
        run: vec!["ghost".to_string(), "%INPUT%".to_string()],
        probe: vec!["coderun-ghost-toolchain".to_string(), "--version".to_string()],
    }
}

fn create_test_engine(root: &Path) -> web::Data<Engine> {
    let config = EngineConfig {
        sandbox_time_limit: MicroSecond(1_000_000),
        compile_time_limit: MicroSecond(5_000_000),
        run_time_limit: MicroSecond(1_000_000),
        max_diagnostic: ByteSize(4096),
        workspace_root: Some(root.to_path_buf()),
        ..Default::default()
    };
    let mut profiles: Vec<_> = LanguageTable::builtin().iter().cloned().collect();
    profiles.push(ghost_profile());
    let table = LanguageTable::new(profiles).expect("Test language table is valid");
    web::Data::new(Engine::new(&config, table))
}

macro_rules! init_app {
    ($engine:expr) => {
        test::init_service(
            App::new()
                .app_data($engine.clone())
                .app_data(web::JsonConfig::default().error_handler(json_error_handler))
                .configure(configure),
        )
        .await
    };
}

#[actix_web::test]
async fn test_execute_javascript_success() {
    let root = unique_root();
    let _guard = TestRootGuard::new(root.clone());
    let engine = create_test_engine(&root);
    let app = init_app!(engine);

    let req = test::TestRequest::post()
        .uri("/execute")
        .set_json(json!({
            "code": "console.log('Hello World!')",
            "language": "javascript"
        }))
        .to_request();

    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);

    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_json_eq!(body, json!({ "result": "", "consoleOutput": "Hello World!" }));
}

#[actix_web::test]
async fn test_execute_on_editor_path() {
    let root = unique_root();
    let _guard = TestRootGuard::new(root.clone());
    let engine = create_test_engine(&root);
    let app = init_app!(engine);

    let req = test::TestRequest::post()
        .uri("/api/projects/execute")
        .set_json(json!({ "code": "echo from shell", "language": "sh" }))
        .to_request();

    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);

    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_json_eq!(body, json!({ "result": "from shell", "consoleOutput": "" }));
    assert_eq!(engine.workspace_stats().live(), 0);
}

#[actix_web::test]
async fn test_execute_failures_are_successful_responses() {
    let root = unique_root();
    let _guard = TestRootGuard::new(root.clone());
    let engine = create_test_engine(&root);
    let app = init_app!(engine);

    let cases = [
        (json!({ "code": "throw new Error('boom')", "language": "js" }), "boom"),
        (
            json!({ "code": "echo broken >&2; exit 3", "language": "shell" }),
            "broken",
        ),
        (
            json!({ "code": "sleep 10", "language": "shell" }),
            "Execution timed out after 1000 ms",
        ),
    ];

    for (request_body, expected) in cases {
        let req = test::TestRequest::post()
            .uri("/execute")
            .set_json(&request_body)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 200, "request {request_body}");

        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["result"], "");
        let console = body["consoleOutput"].as_str().unwrap();
        assert!(console.contains(expected), "{console:?} lacks {expected:?}");
    }
}

#[actix_web::test]
async fn test_execute_invalid_requests() {
    let root = unique_root();
    let _guard = TestRootGuard::new(root.clone());
    let engine = create_test_engine(&root);
    let app = init_app!(engine);

    let bodies = [
        json!({ "code": "print(1)" }),
        json!({ "language": "python" }),
        json!({ "code": "", "language": "python" }),
        json!({ "code": "print(1)", "language": "cobol" }),
        json!({ "code": 42, "language": "python" }),
    ];

    for request_body in bodies {
        let req = test::TestRequest::post()
            .uri("/execute")
            .set_json(&request_body)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 400, "request {request_body}");

        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_json_include!(
            actual: body,
            expected: json!({ "reason": "ERR_INVALID_ARGUMENT", "code": 1 })
        );
    }

    // Not JSON at all
    let req = test::TestRequest::post()
        .uri("/execute")
        .insert_header(("content-type", "application/json"))
        .set_payload("{ not json")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);

    assert_eq!(engine.workspace_stats().acquired, 0);
}

#[actix_web::test]
async fn test_execute_unavailable_toolchain() {
    let root = unique_root();
    let _guard = TestRootGuard::new(root.clone());
    let engine = create_test_engine(&root);
    let app = init_app!(engine);

    let req = test::TestRequest::post()
        .uri("/execute")
        .set_json(json!({ "code": "boo", "language": "spooky" }))
        .to_request();

    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 422);

    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_json_eq!(
        body,
        json!({
            "reason": "ERR_UNSUPPORTED_LANGUAGE",
            "code": 4,
            "message": "Language 'ghost' is not available on this host"
        })
    );
    assert_eq!(engine.workspace_stats().acquired, 0);
}

#[actix_web::test]
async fn test_execute_infrastructure_fault_hides_details() {
    let root = unique_root();
    let _guard = TestRootGuard::new(root.clone());
    // A plain file where the workspace root should be
    fs::write(&root, "occupied").unwrap();
    let engine = create_test_engine(&root);
    let app = init_app!(engine);

    let req = test::TestRequest::post()
        .uri("/execute")
        .set_json(json!({ "code": "echo hi", "language": "shell" }))
        .to_request();

    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 500);

    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_json_eq!(
        body,
        json!({
            "reason": "ERR_INTERNAL",
            "code": 6,
            "message": "Error executing code"
        })
    );
}

#[actix_web::test]
async fn test_get_languages() {
    let root = unique_root();
    let _guard = TestRootGuard::new(root.clone());
    let engine = create_test_engine(&root);
    let app = init_app!(engine);

    let req = test::TestRequest::get().uri("/languages").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);

    let body: serde_json::Value = test::read_body_json(resp).await;
    let languages = body.as_array().unwrap();
    assert_eq!(languages.len(), LanguageTable::builtin().iter().count() + 1);

    assert_json_eq!(
        languages[0],
        json!({
            "name": "javascript",
            "aliases": ["js"],
            "sandboxed": true,
            "available": true
        })
    );
    let ghost = languages.iter().find(|l| l["name"] == "ghost").unwrap();
    assert_eq!(ghost["available"], false);
    let shell = languages.iter().find(|l| l["name"] == "shell").unwrap();
    assert_eq!(shell["available"], true);
}
