//! Command channel between a test runner and the [`MockServer`].
//!
//! The runner writes one JSON request per line and waits for exactly one
//! reply line before it sends the next request, so every command is
//! synchronous from its point of view:
//!
//! ```text
//! > {"command": "resetAPIMocks"}
//! < {"ok":true,"result":null}
//! > {"command": "mockAPIResponse", "payload": {"route": "/test", "method": "GET", "data": {"foo": "bar"}}}
//! < {"ok":true,"result":null}
//! > {"command": "mockAPIResponse", "payload": {"route": "/test", "method": "PUT", "data": null}}
//! < {"ok":false,"error":"Unsupported method: PUT (only GET, POST and DELETE are supported)"}
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

use crate::error::Error;
use crate::method::MockMethod;
use crate::rule::{DEFAULT_IDLE_TIME, MockResponse, QueryFilter};
use crate::server::MockServer;

/// Target used for lines forwarded through the `log` command
pub const RUNNER_LOG_TARGET: &str = "mock_api_server::runner";

/// A request line as it arrives on the channel
#[derive(Debug, Deserialize)]
pub struct CommandRequest {
    pub command: String,
    #[serde(default)]
    pub payload: Value,
}

/// Payload of the `mockAPIResponse` command
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MockApiResponse {
    pub route: String,
    pub method: String,
    #[serde(default)]
    pub data: Value,
    pub with_query: Option<QueryFilter>,
    pub should_log_received_data: Option<bool>,
    pub idle_time_in_ms: Option<u64>,
}

impl MockApiResponse {
    /// Convert into a [`MockResponse`], rejecting unsupported methods
    pub fn into_mock_response(self) -> Result<MockResponse, Error> {
        let method: MockMethod = self.method.parse()?;
        let idle_time = self
            .idle_time_in_ms
            .map_or(DEFAULT_IDLE_TIME, Duration::from_millis);

        Ok(MockResponse::new(self.route, method, self.data)
            .with_query(self.with_query)
            .with_record_body(self.should_log_received_data.unwrap_or(false))
            .with_idle_time(idle_time))
    }
}

/// Payload of the `log` command, either a bare string or `{"message": ...}`
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum LogPayload {
    Text(String),
    Message { message: String },
}

impl LogPayload {
    pub fn message(&self) -> &str {
        match self {
            LogPayload::Text(message) | LogPayload::Message { message } => message,
        }
    }
}

/// Commands understood by the bridge
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    OnRunStart,
    OnRunEnd,
    MockApiResponse(MockApiResponse),
    GetReceivedData,
    ResetApiMocks,
    Log(LogPayload),
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::OnRunStart => "onRunStart",
            Command::OnRunEnd => "onRunEnd",
            Command::MockApiResponse(_) => "mockAPIResponse",
            Command::GetReceivedData => "getReceivedData",
            Command::ResetApiMocks => "resetAPIMocks",
            Command::Log(_) => "log",
        }
    }
}

impl TryFrom<CommandRequest> for Command {
    type Error = Error;

    fn try_from(request: CommandRequest) -> Result<Self, Self::Error> {
        let command = match request.command.as_str() {
            "onRunStart" => Command::OnRunStart,
            "onRunEnd" => Command::OnRunEnd,
            "mockAPIResponse" => Command::MockApiResponse(serde_json::from_value(request.payload)?),
            "getReceivedData" => Command::GetReceivedData,
            "resetAPIMocks" => Command::ResetApiMocks,
            "log" => Command::Log(serde_json::from_value(request.payload)?),
            other => return Err(Error::Command(format!("unknown command '{other}'"))),
        };
        Ok(command)
    }
}

impl std::str::FromStr for Command {
    type Err = Error;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let request: CommandRequest = serde_json::from_str(line)?;
        request.try_into()
    }
}

/// One reply line
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CommandReply {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CommandReply {
    pub fn success(result: Value) -> Self {
        Self {
            ok: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(error: &Error) -> Self {
        Self {
            ok: false,
            result: None,
            error: Some(error.to_string()),
        }
    }
}

/// Drives a [`MockServer`] on behalf of a test runner
pub struct CommandBridge<'a> {
    server: &'a mut MockServer,
}

impl<'a> CommandBridge<'a> {
    pub fn new(server: &'a mut MockServer) -> Self {
        Self { server }
    }

    pub fn server(&self) -> &MockServer {
        &*self.server
    }

    /// Execute one command; acknowledgements are `null`
    pub async fn dispatch(&mut self, command: Command) -> Result<Value, Error> {
        debug!(command = command.name(), "Dispatching command");
        match command {
            Command::OnRunStart => {
                self.server.start().await?;
                Ok(Value::Null)
            }
            Command::OnRunEnd => {
                self.server.stop().await;
                Ok(Value::Null)
            }
            Command::MockApiResponse(payload) => {
                self.server.mock_response(payload.into_mock_response()?);
                Ok(Value::Null)
            }
            Command::GetReceivedData => Ok(Value::Array(self.server.received_data())),
            Command::ResetApiMocks => {
                self.server.reset();
                Ok(Value::Null)
            }
            Command::Log(payload) => {
                info!(target: RUNNER_LOG_TARGET, "{}", payload.message());
                Ok(Value::Null)
            }
        }
    }

    /// Decode and execute a single request line
    pub async fn handle_line(&mut self, line: &str) -> CommandReply {
        let result = match line.parse::<Command>() {
            Ok(command) => self.dispatch(command).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(value) => CommandReply::success(value),
            Err(e) => {
                warn!(error = %e, "Command failed");
                CommandReply::failure(&e)
            }
        }
    }

    /// Serve requests from `input` until it is closed
    ///
    /// A server still running when the loop ends is stopped, whether the
    /// input closed or reading from it failed.
    pub async fn serve<R, W>(&mut self, input: R, output: W) -> Result<(), Error>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let result = self.serve_lines(input, output).await;
        match &result {
            Ok(()) => debug!("Command channel closed"),
            Err(e) => warn!(error = %e, "Command channel failed"),
        }
        if self.server.is_running() {
            self.server.stop().await;
        }
        result
    }

    async fn serve_lines<R, W>(&mut self, mut input: R, mut output: W) -> Result<(), Error>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut buf = Vec::new();
        loop {
            buf.clear();
            if input.read_until(b'\n', &mut buf).await? == 0 {
                return Ok(());
            }

            let reply = match std::str::from_utf8(&buf) {
                Ok(line) if line.trim().is_empty() => continue,
                Ok(line) => self.handle_line(line.trim()).await,
                Err(e) => {
                    let error =
                        Error::Command(format!("request line is not valid UTF-8: {e}"));
                    warn!(error = %error, "Command failed");
                    CommandReply::failure(&error)
                }
            };

            let mut encoded = serde_json::to_vec(&reply)?;
            encoded.push(b'\n');
            output.write_all(&encoded).await?;
            output.flush().await?;
        }
    }
}
