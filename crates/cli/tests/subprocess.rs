//! Real child processes: the echo server binary behind the launcher, and the
//! `toolhub` binary driven through a config file.

use std::collections::HashMap;
use std::io::Write;
use std::process::Command;
use std::sync::Arc;

use serde_json::{json, Value};
use toolhub_mcp::{
    into_registry, BuildOptions, ExitKind, McpError, ServerDescriptor, SessionState, ToolSet,
    UriPattern,
};
use toolhub_tool_runtime::planner::mock::MockPlanner;
use toolhub_tool_runtime::{AgenticLoop, Conversation, Planner, Turn};

const ECHO_SERVER: &str = env!("CARGO_BIN_EXE_toolhub-echo-server");
const TOOLHUB: &str = env!("CARGO_BIN_EXE_toolhub");

fn echo_server(name: &str) -> ServerDescriptor {
    ServerDescriptor::subprocess(name, ECHO_SERVER, ["--name", name])
        .with_env("RUST_LOG", "warn")
}

#[tokio::test]
async fn subprocess_servers_round_trip() {
    let set = ToolSet::build(
        vec![echo_server("alpha"), echo_server("beta")],
        BuildOptions::default(),
    )
    .await
    .unwrap();

    // Both servers offer the same operations; alpha's win.
    assert_eq!(set.len(), 4);
    assert_eq!(set.collisions().len(), 4);
    assert!(set.operations().iter().all(|op| op.server == "alpha"));

    let result = set.route("whoami", json!({})).await.unwrap();
    assert_eq!(result.text(), "alpha");
    let result = set.route("echo", json!({"text": "hi"})).await.unwrap();
    assert_eq!(result.text(), "hi");

    match set.route("fail", json!({})).await.unwrap_err() {
        McpError::ToolExecution { operation, message } => {
            assert_eq!(operation, "fail");
            assert!(message.contains("deliberate failure"));
        }
        other => panic!("expected ToolExecution, got {:?}", other),
    }

    let greeting = UriPattern::parse("greeting://{name}").unwrap();
    let bindings = HashMap::from([("name".to_string(), "Ada".to_string())]);
    let read = set.read_resource(&greeting, &bindings).await.unwrap();
    assert_eq!(read.text(), "Hello, Ada!");

    let info = UriPattern::parse("server://info").unwrap();
    let read = set.read_resource_from("beta", &info, &HashMap::new()).await.unwrap();
    assert_eq!(read.text(), "beta stub server");

    assert!(set.close().await.is_empty());
    for server in ["alpha", "beta"] {
        let session = set.session(server).unwrap();
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(session.exit_kind(), Some(ExitKind::Clean));
    }
}

#[tokio::test]
async fn crashed_server_yields_session_closed() {
    let set = ToolSet::build(vec![echo_server("fragile")], BuildOptions::default())
        .await
        .unwrap();

    let err = set.route("crash", json!({})).await.unwrap_err();
    assert!(matches!(err, McpError::SessionClosed { ref server } if server == "fragile"));
    let session = set.session("fragile").unwrap();
    assert_eq!(session.state(), SessionState::Closed);
    assert_eq!(session.exit_kind(), Some(ExitKind::Failed(Some(3))));
    let err = set.route("echo", json!({"text": "still there?"})).await.unwrap_err();
    assert!(matches!(err, McpError::SessionClosed { .. }));
    set.close().await;
}

#[tokio::test]
async fn agentic_loop_drives_remote_tools() {
    let set = Arc::new(
        ToolSet::build(vec![echo_server("alpha")], BuildOptions::default())
            .await
            .unwrap(),
    );
    let registry = Arc::new(into_registry(&set).unwrap());

    let planner = Arc::new(MockPlanner::new());
    planner.queue_call("call_1", "whoami", json!({}));
    planner.queue_text("You are talking to alpha.");

    let agentic_loop = AgenticLoop::new(planner.clone() as Arc<dyn Planner>, registry);
    let mut conversation = Conversation::new(100_000);
    let answer = agentic_loop
        .run(&mut conversation, "Which server is this?")
        .await
        .unwrap();

    assert_eq!(answer, "You are talking to alpha.");
    match &conversation.turns()[2] {
        Turn::Tool(result) => {
            assert_eq!(result.tool_call_id, "call_1");
            assert_eq!(result.content, "alpha");
        }
        other => panic!("expected tool result, got {:?}", other),
    }
    let offered = &planner.seen_tools()[0];
    assert!(offered.contains(&"whoami".to_string()));
    set.close().await;
}

fn run_toolhub(config: &std::path::Path, args: &[&str]) -> (bool, Value) {
    let output = Command::new(TOOLHUB)
        .arg("--config")
        .arg(config)
        .args(args)
        .env("RUST_LOG", "error")
        .output()
        .unwrap();
    let stdout = String::from_utf8_lossy(&output.stdout);
    let value = serde_json::from_str(&stdout).unwrap_or(Value::Null);
    (output.status.success(), value)
}

#[test]
fn toolhub_binary_lists_and_calls() {
    let mut config = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    writeln!(
        config,
        "[servers.alpha]\ncommand = {:?}\nargs = [\"--name\", \"alpha\"]\n",
        ECHO_SERVER
    )
    .unwrap();

    let (ok, tools) = run_toolhub(config.path(), &["tools"]);
    assert!(ok);
    let names: Vec<_> = tools
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["name"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(names, vec!["echo", "whoami", "fail", "crash"]);

    let (ok, result) = run_toolhub(
        config.path(),
        &["call", "echo", "--args", r#"{"text": "from the cli"}"#],
    );
    assert!(ok);
    assert_eq!(result["content"][0]["text"], "from the cli");

    let (ok, result) = run_toolhub(
        config.path(),
        &["read", "greeting://{name}", "--bind", "name=cli"],
    );
    assert!(ok);
    assert_eq!(result["contents"][0]["text"], "Hello, cli!");

    let (ok, _) = run_toolhub(config.path(), &["call", "fail"]);
    assert!(!ok);
}

#[test]
fn toolhub_binary_fails_fast_on_missing_command() {
    let mut config = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
    write!(
        config,
        r#"{{"mcpServers": {{"alpha": {{"command": {:?}}}, "ghost": {{"command": "/nonexistent/ghost-server"}}}}}}"#,
        ECHO_SERVER
    )
    .unwrap();

    let (ok, output) = run_toolhub(config.path(), &["tools"]);
    assert!(!ok);
    assert_eq!(output, Value::Null);
}
