//! Client side: owns a server child process and talks to it over stdio
//!
//! Every call is a blocking write-then-read round trip. There is no
//! pipelining: the response read after a request must carry that request's id.
//! The child's stderr is drained on a background thread into a bounded tail
//! used only for diagnostics.

use std::{
    collections::VecDeque,
    io::{BufRead, BufReader, Write},
    process::{Child, ChildStderr, ChildStdin, ChildStdout, Command, ExitStatus, Stdio},
    sync::{Arc, Mutex},
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use serde::{de::DeserializeOwned, Deserialize};
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use crate::errors::ClientError;
use crate::mcp::codec::{self, Method, Request};
use crate::mcp::server::PROTOCOL_VERSION;
use crate::registry::{
    tools::{CallToolResult, ToolArguments},
    ListResourceTemplatesResult, ListResourcesResult, ListToolsResult, ReadResourceResult,
};

/// Lines of child stderr kept for error reports.
const STDERR_TAIL_LINES: usize = 50;

/// How long a child gets to exit on its own once its stdio is closed.
const EXIT_GRACE: Duration = Duration::from_millis(500);
const POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ServerInfo {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InitializeResult {
    #[serde(default)]
    protocol_version: String,
    #[serde(default)]
    server_info: ServerInfo,
}

type StderrTail = Arc<Mutex<VecDeque<String>>>;

struct Connection {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    stderr_tail: StderrTail,
    stderr_drain: Option<JoinHandle<()>>,
    exited: bool,
}

impl Connection {
    fn send(&mut self, request: &Request) -> Result<(), ClientError> {
        let line = codec::encode(request)?;
        writeln!(self.stdin, "{line}")?;
        self.stdin.flush()?;
        Ok(())
    }

    fn receive(&mut self) -> Result<codec::Response, ClientError> {
        let mut line = String::new();
        loop {
            line.clear();
            if self.stdout.read_line(&mut line)? == 0 {
                return Err(self.closed());
            }
            if !line.trim().is_empty() {
                break;
            }
        }

        codec::decode_response(line.trim_end()).map_err(|err| ClientError::Malformed(err.to_string()))
    }

    /// Build the end-of-stream error once the child and its stderr have settled.
    fn closed(&mut self) -> ClientError {
        let deadline = Instant::now() + EXIT_GRACE;
        if !self.exited {
            if let Some(status) = wait_for_exit(&mut self.child, EXIT_GRACE) {
                info!(status = %status, "server process exited");
                self.exited = true;
            }
        }
        if self.exited {
            self.join_stderr_drain(deadline);
        }
        ClientError::Closed {
            stderr: tail_text(&self.stderr_tail),
        }
    }

    fn join_stderr_drain(&mut self, deadline: Instant) {
        while self
            .stderr_drain
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
            && Instant::now() < deadline
        {
            thread::sleep(POLL_INTERVAL);
        }
        if !self
            .stderr_drain
            .as_ref()
            .is_some_and(JoinHandle::is_finished)
        {
            return;
        }
        if let Some(handle) = self.stderr_drain.take() {
            if handle.join().is_err() {
                warn!("stderr drain thread panicked");
            }
        }
    }
}

pub struct Client {
    command: String,
    args: Vec<String>,
    name: String,
    version: String,
    next_id: u64,
    connection: Option<Connection>,
    server_info: Option<ServerInfo>,
    protocol_version: Option<String>,
}

impl Client {
    pub fn new<I, S>(command: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            command: command.into(),
            args: args.into_iter().map(Into::into).collect(),
            name: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            next_id: 1,
            connection: None,
            server_info: None,
            protocol_version: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn server_info(&self) -> Option<&ServerInfo> {
        self.server_info.as_ref()
    }

    pub fn protocol_version(&self) -> Option<&str> {
        self.protocol_version.as_deref()
    }

    pub fn process_id(&self) -> Option<u32> {
        self.connection.as_ref().map(|connection| connection.child.id())
    }

    /// Most recent stderr lines from the child, oldest first.
    pub fn stderr_tail(&self) -> Vec<String> {
        self.connection
            .as_ref()
            .map(|connection| lock_tail(&connection.stderr_tail).iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Spawn the server and run the `initialize` / `notifications/initialized` handshake.
    pub fn connect(&mut self) -> Result<(), ClientError> {
        if self.is_running() {
            return Ok(());
        }
        self.close();

        let mut child = Command::new(&self.command)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| ClientError::Spawn {
                command: self.command.clone(),
                source,
            })?;

        let pipes = take_pipes(&mut child);
        let (stdin, stdout, stderr) = match pipes {
            Ok(pipes) => pipes,
            Err(err) => {
                reap(child, Duration::ZERO);
                return Err(err);
            }
        };

        let stderr_tail = StderrTail::default();
        let drain_tail = Arc::clone(&stderr_tail);
        let stderr_drain = match thread::Builder::new()
            .name("mcp-client-stderr".to_string())
            .spawn(move || drain_stderr(stderr, drain_tail))
        {
            Ok(handle) => handle,
            Err(err) => {
                reap(child, Duration::ZERO);
                return Err(ClientError::Io(err));
            }
        };

        info!(command = %self.command, pid = child.id(), "server process spawned");
        self.connection = Some(Connection {
            child,
            stdin,
            stdout: BufReader::new(stdout),
            stderr_tail,
            stderr_drain: Some(stderr_drain),
            exited: false,
        });
        self.next_id = 1;

        if let Err(err) = self.handshake() {
            warn!(command = %self.command, error = %err, "handshake failed");
            self.close();
            return Err(err);
        }
        Ok(())
    }

    fn handshake(&mut self) -> Result<(), ClientError> {
        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": { "name": self.name, "version": self.version },
        });
        let result: InitializeResult = self.request(Method::Initialize, as_params(params))?;
        debug!(
            server = %result.server_info.name,
            protocol_version = %result.protocol_version,
            "initialize acknowledged"
        );
        self.server_info = Some(result.server_info);
        self.protocol_version = Some(result.protocol_version);

        self.connection()?
            .send(&Request::notification(Method::Initialized))
    }

    /// True while a child exists and has not been observed to exit.
    pub fn is_running(&mut self) -> bool {
        let Some(connection) = self.connection.as_mut() else {
            return false;
        };
        if connection.exited {
            return false;
        }
        match connection.child.try_wait() {
            Ok(None) => true,
            Ok(Some(status)) => {
                info!(status = %status, "server process exited");
                connection.exited = true;
                false
            }
            Err(err) => {
                warn!(error = %err, "failed to poll server process");
                connection.exited = true;
                false
            }
        }
    }

    pub fn ping(&mut self) -> Result<(), ClientError> {
        let _: Value = self.request(Method::Ping, None)?;
        Ok(())
    }

    pub fn list_tools(&mut self, cursor: Option<&str>) -> Result<ListToolsResult, ClientError> {
        self.request(Method::ToolsList, cursor_params(cursor))
    }

    pub fn call_tool(
        &mut self,
        name: &str,
        arguments: ToolArguments,
    ) -> Result<CallToolResult, ClientError> {
        let params = json!({ "name": name, "arguments": arguments });
        self.request(Method::ToolsCall, as_params(params))
    }

    pub fn list_resources(
        &mut self,
        cursor: Option<&str>,
    ) -> Result<ListResourcesResult, ClientError> {
        self.request(Method::ResourcesList, cursor_params(cursor))
    }

    pub fn list_resource_templates(
        &mut self,
        cursor: Option<&str>,
    ) -> Result<ListResourceTemplatesResult, ClientError> {
        self.request(Method::ResourceTemplatesList, cursor_params(cursor))
    }

    pub fn read_resource(&mut self, uri: &str) -> Result<ReadResourceResult, ClientError> {
        self.request(Method::ResourcesRead, as_params(json!({ "uri": uri })))
    }

    /// Close the child's stdin, give it a moment to exit, then kill and reap it.
    /// Does nothing when not connected.
    pub fn close(&mut self) {
        let Some(connection) = self.connection.take() else {
            return;
        };
        let Connection { child, stdin, .. } = connection;
        drop(stdin);
        reap(child, EXIT_GRACE);
    }

    fn connection(&mut self) -> Result<&mut Connection, ClientError> {
        if !self.is_running() {
            return Err(ClientError::NotRunning);
        }
        self.connection.as_mut().ok_or(ClientError::NotRunning)
    }

    fn request<T: DeserializeOwned>(
        &mut self,
        method: Method,
        params: Option<Map<String, Value>>,
    ) -> Result<T, ClientError> {
        if !self.is_running() {
            return Err(ClientError::NotRunning);
        }
        let id = self.next_id;
        self.next_id += 1;
        let connection = self.connection()?;

        debug!(id, method = %method, "sending request");
        connection.send(&Request::new(id, method, params))?;
        let response = connection.receive()?;

        if response.id != Value::from(id) {
            return Err(ClientError::UnexpectedResponse {
                expected: id,
                actual: response.id,
            });
        }
        if let Some(error) = response.error {
            return Err(ClientError::Server {
                code: error.code,
                message: error.message,
                data: error.data,
            });
        }

        serde_json::from_value(response.result.unwrap_or(Value::Null))
            .map_err(|err| ClientError::Malformed(err.to_string()))
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.close();
    }
}

fn take_pipes(child: &mut Child) -> Result<(ChildStdin, ChildStdout, ChildStderr), ClientError> {
    let stdin = child
        .stdin
        .take()
        .ok_or(ClientError::MissingPipe { stream: "stdin" })?;
    let stdout = child
        .stdout
        .take()
        .ok_or(ClientError::MissingPipe { stream: "stdout" })?;
    let stderr = child
        .stderr
        .take()
        .ok_or(ClientError::MissingPipe { stream: "stderr" })?;
    Ok((stdin, stdout, stderr))
}

fn wait_for_exit(child: &mut Child, grace: Duration) -> Option<ExitStatus> {
    let deadline = Instant::now() + grace;
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Some(status),
            Ok(None) if Instant::now() < deadline => thread::sleep(POLL_INTERVAL),
            Ok(None) => return None,
            Err(err) => {
                warn!(error = %err, "failed to poll server process");
                return None;
            }
        }
    }
}

/// Kill the child if it is still running after `grace`, then wait for it.
fn reap(mut child: Child, grace: Duration) {
    if wait_for_exit(&mut child, grace).is_none() {
        if let Err(err) = child.kill() {
            debug!(error = %err, "kill skipped, process already gone");
        }
    }
    match child.wait() {
        Ok(status) => info!(status = %status, "server process closed"),
        Err(err) => warn!(error = %err, "failed to wait for server process"),
    }
}

fn drain_stderr(stderr: ChildStderr, tail: StderrTail) {
    for line in BufReader::new(stderr).lines() {
        let Ok(line) = line else {
            break;
        };
        debug!(line = %line, "server stderr");
        let mut tail = lock_tail(&tail);
        if tail.len() == STDERR_TAIL_LINES {
            tail.pop_front();
        }
        tail.push_back(line);
    }
}

fn lock_tail(tail: &StderrTail) -> std::sync::MutexGuard<'_, VecDeque<String>> {
    tail.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn tail_text(tail: &StderrTail) -> String {
    lock_tail(tail).iter().cloned().collect::<Vec<_>>().join("\n")
}

fn cursor_params(cursor: Option<&str>) -> Option<Map<String, Value>> {
    cursor.and_then(|cursor| as_params(json!({ "cursor": cursor })))
}

fn as_params(value: Value) -> Option<Map<String, Value>> {
    match value {
        Value::Object(map) => Some(map),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HANDSHAKE_REPLY: &str = r#"{"jsonrpc":"2.0","id":1,"result":{"protocolVersion":"2024-11-05","serverInfo":{"name":"mock","version":"1.0.0"}}}"#;

    /// A shell peer that answers the handshake, then replies with `replies` in order.
    fn scripted_client(replies: &[&str]) -> Client {
        let mut script = format!(
            "read -r line; printf '%s\\n' '{HANDSHAKE_REPLY}'; read -r line; "
        );
        for reply in replies {
            script.push_str(&format!("read -r line; printf '%s\\n' '{reply}'; "));
        }
        script.push_str("read -r line; echo 'mock: shutting down' >&2; exit 3");
        Client::new("sh", ["-c".to_string(), script])
    }

    #[test]
    fn new_client_is_not_running() {
        let mut client = Client::new("mock", ["--version"])
            .with_name("test-client")
            .with_version("1.0.0");
        assert_eq!(client.command(), "mock");
        assert_eq!(client.args(), ["--version".to_string()]);
        assert!(!client.is_running());
        assert_eq!(client.process_id(), None);
    }

    #[test]
    fn calls_without_connection_fail_fast() {
        let mut client = Client::new("mock", Vec::<String>::new());

        let error = client.list_tools(None).expect_err("not running");
        assert!(matches!(error, ClientError::NotRunning));
        assert_eq!(error.to_string(), "Server process not running");

        let error = client
            .call_tool("test", ToolArguments::new())
            .expect_err("not running");
        assert!(matches!(error, ClientError::NotRunning));
    }

    #[test]
    fn close_without_connection_is_noop() {
        let mut client = Client::new("mock", Vec::<String>::new());
        client.close();
        assert!(!client.is_running());
    }

    #[test]
    fn spawn_failure_is_reported() {
        let mut client = Client::new("/nonexistent/mcp-server-binary", Vec::<String>::new());
        let error = client.connect().expect_err("spawn must fail");
        assert!(matches!(error, ClientError::Spawn { .. }));
        assert!(!client.is_running());
    }

    #[cfg(unix)]
    #[test]
    fn connect_handshakes_and_correlates_ids() {
        let mut client = scripted_client(&[
            r#"{"jsonrpc":"2.0","id":2,"result":{"tools":[{"name":"test_tool","description":"Test tool"}]}}"#,
            r#"{"jsonrpc":"2.0","id":3,"result":{"content":[{"type":"text","text":"done"}]}}"#,
        ]);
        client.connect().expect("connect");

        assert!(client.is_running());
        assert!(client.process_id().is_some());
        assert_eq!(
            client.server_info(),
            Some(&ServerInfo {
                name: "mock".to_string(),
                version: "1.0.0".to_string(),
            })
        );
        assert_eq!(client.protocol_version(), Some("2024-11-05"));

        let tools = client.list_tools(None).expect("list tools");
        assert_eq!(tools.tools.len(), 1);
        assert_eq!(tools.tools[0].name, "test_tool");
        assert_eq!(tools.next_cursor, None);

        let mut args = ToolArguments::new();
        args.insert("key".to_string(), Value::from("value"));
        let result = client.call_tool("test_tool", args).expect("call tool");
        assert_eq!(result.first_text(), Some("done"));

        client.close();
        assert!(!client.is_running());
    }

    #[cfg(unix)]
    #[test]
    fn mismatched_response_id_is_rejected() {
        let mut client =
            scripted_client(&[r#"{"jsonrpc":"2.0","id":99,"result":{}}"#]);
        client.connect().expect("connect");

        let error = client.ping().expect_err("wrong id");
        match error {
            ClientError::UnexpectedResponse { expected, actual } => {
                assert_eq!(expected, 2);
                assert_eq!(actual, Value::from(99));
            }
            other => panic!("expected UnexpectedResponse, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn server_errors_surface_with_code() {
        let mut client = scripted_client(&[
            r#"{"jsonrpc":"2.0","id":2,"error":{"code":-32600,"message":"Resource not found","data":{"uri":"/x"}}}"#,
        ]);
        client.connect().expect("connect");

        let error = client.read_resource("/x").expect_err("server error");
        match error {
            ClientError::Server {
                code,
                message,
                data,
            } => {
                assert_eq!(code, -32600);
                assert_eq!(message, "Resource not found");
                assert_eq!(data, Some(json!({ "uri": "/x" })));
            }
            other => panic!("expected Server error, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn closed_stream_carries_stderr_and_marks_process_exited() {
        let mut client = scripted_client(&[]);
        client.connect().expect("connect");

        let error = client.ping().expect_err("peer exits");
        match &error {
            ClientError::Closed { stderr } => assert_eq!(stderr, "mock: shutting down"),
            other => panic!("expected Closed, got {other:?}"),
        }
        assert!(error.to_string().ends_with(" | stderr: mock: shutting down"));
        assert!(!client.is_running());

        let error = client.ping().expect_err("not running any more");
        assert!(matches!(error, ClientError::NotRunning));
    }

    #[cfg(unix)]
    #[test]
    fn stderr_written_just_before_exit_is_never_lost() {
        for attempt in 0..20 {
            let mut client = scripted_client(&[]);
            client.connect().expect("connect");
            match client.ping().expect_err("peer exits") {
                ClientError::Closed { stderr } => {
                    assert_eq!(stderr, "mock: shutting down", "attempt {attempt}")
                }
                other => panic!("expected Closed, got {other:?}"),
            }
        }
    }

    #[cfg(unix)]
    #[test]
    fn close_lets_the_server_exit_on_end_of_input() {
        let marker = std::env::temp_dir().join(format!(
            "stdio-mcp-close-{}-{:?}",
            std::process::id(),
            thread::current().id()
        ));
        let _ = std::fs::remove_file(&marker);

        let script = format!(
            "read -r line; printf '%s\\n' '{HANDSHAKE_REPLY}'; read -r line; \
             while read -r line; do :; done; printf 'clean' > \"$1\""
        );
        let mut client = Client::new(
            "sh",
            [
                "-c".to_string(),
                script,
                "sh".to_string(),
                marker.display().to_string(),
            ],
        );
        client.connect().expect("connect");
        client.close();

        let written = std::fs::read_to_string(&marker).expect("server wrote its exit marker");
        assert_eq!(written, "clean");
        let _ = std::fs::remove_file(&marker);
    }

    #[cfg(unix)]
    #[test]
    fn failed_handshake_leaves_client_disconnected() {
        let mut client = Client::new("sh", ["-c", "exit 0"]);
        let error = client.connect().expect_err("peer never answers");
        assert!(matches!(
            error,
            ClientError::Closed { .. } | ClientError::Io(_)
        ));
        assert!(!client.is_running());
        assert_eq!(client.process_id(), None);
    }
}
