use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use mock_api_server::{CommandBridge, MockServer};
use serde_json::{Value, json};
use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader, DuplexStream, Lines, ReadBuf,
};

mod common;
use common::free_port;

/// Runner side of the command channel
struct Runner {
    commands: DuplexStream,
    replies: Lines<BufReader<DuplexStream>>,
}

impl Runner {
    async fn send(&mut self, request: Value) -> anyhow::Result<Value> {
        self.send_raw(&request.to_string()).await
    }

    async fn send_raw(&mut self, line: &str) -> anyhow::Result<Value> {
        self.send_bytes(line.as_bytes()).await
    }

    async fn send_bytes(&mut self, line: &[u8]) -> anyhow::Result<Value> {
        self.commands.write_all(line).await?;
        self.commands.write_all(b"\n").await?;
        let reply = self
            .replies
            .next_line()
            .await?
            .ok_or_else(|| anyhow::anyhow!("bridge closed the reply channel"))?;
        Ok(serde_json::from_str(&reply)?)
    }
}

/// Input that yields its bytes once and then fails every read
struct BrokenInput {
    pending: &'static [u8],
}

impl AsyncRead for BrokenInput {
    fn poll_read(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if self.pending.is_empty() {
            return Poll::Ready(Err(io::Error::other("runner pipe broke")));
        }
        let n = self.pending.len().min(buf.remaining());
        buf.put_slice(&self.pending[..n]);
        self.pending = &self.pending[n..];
        Poll::Ready(Ok(()))
    }
}

/// Full test run: start, mock, request, inspect, reset, end
#[tokio::test]
async fn test_runner_session() -> anyhow::Result<()> {
    let port = free_port()?;
    let base = format!("http://127.0.0.1:{port}");
    let mut server = MockServer::new(port);

    let (commands, bridge_input) = tokio::io::duplex(64 * 1024);
    let (bridge_output, replies) = tokio::io::duplex(64 * 1024);
    let mut runner = Runner {
        commands,
        replies: BufReader::new(replies).lines(),
    };

    let mut bridge = CommandBridge::new(&mut server);
    let served = bridge.serve(BufReader::new(bridge_input), bridge_output);

    let session = async move {
        let ack = json!({"ok": true, "result": null});
        let client = reqwest::Client::new();

        assert_eq!(runner.send(json!({"command": "onRunStart"})).await?, ack);

        let root = client.get(&base).send().await?;
        assert_eq!(root.text().await?, "Mock API server is up");

        let reply = runner
            .send(json!({
                "command": "mockAPIResponse",
                "payload": {
                    "route": "/test",
                    "method": "GET",
                    "data": {"foo": "bar"}
                }
            }))
            .await?;
        assert_eq!(reply, ack);

        let response = client.get(format!("{base}/test")).send().await?;
        assert_eq!(response.status(), 200);
        assert_eq!(response.json::<Value>().await?, json!({"foo": "bar"}));

        let reply = runner
            .send(json!({
                "command": "mockAPIResponse",
                "payload": {
                    "route": "/orders",
                    "method": "POST",
                    "data": {"id": 7},
                    "shouldLogReceivedData": true,
                    "idleTimeInMs": 0
                }
            }))
            .await?;
        assert_eq!(reply, ack);

        client
            .post(format!("{base}/orders"))
            .json(&json!({"item": "kibble", "quantity": 2}))
            .send()
            .await?;

        let received = runner.send(json!({"command": "getReceivedData"})).await?;
        assert_eq!(
            received,
            json!({"ok": true, "result": [{"item": "kibble", "quantity": 2}]})
        );

        let rejected = runner
            .send(json!({
                "command": "mockAPIResponse",
                "payload": {"route": "/test", "method": "PUT", "data": {}}
            }))
            .await?;
        assert_eq!(rejected["ok"], false);
        assert!(
            rejected["error"]
                .as_str()
                .unwrap()
                .contains("Unsupported method: PUT")
        );

        let malformed = runner.send_raw("{not json").await?;
        assert_eq!(malformed["ok"], false);

        let logged = runner
            .send(json!({"command": "log", "payload": {"message": "step done"}}))
            .await?;
        assert_eq!(logged, ack);

        assert_eq!(runner.send(json!({"command": "resetAPIMocks"})).await?, ack);
        let cleared = runner.send(json!({"command": "getReceivedData"})).await?;
        assert_eq!(cleared, json!({"ok": true, "result": []}));
        let gone = client.get(format!("{base}/test")).send().await?;
        assert_eq!(gone.status(), 404);

        assert_eq!(runner.send(json!({"command": "onRunEnd"})).await?, ack);
        assert!(client.get(&base).send().await.is_err());

        // Closing the channel ends the bridge loop
        drop(runner);
        anyhow::Ok(())
    };

    let (served, session) = tokio::join!(served, session);
    session?;
    served?;
    assert!(!server.is_running());
    Ok(())
}

/// Closing the channel mid-run stops the server
#[tokio::test]
async fn test_channel_close_stops_server() -> anyhow::Result<()> {
    let port = free_port()?;
    let mut server = MockServer::new(port);

    let (commands, bridge_input) = tokio::io::duplex(4096);
    let (bridge_output, replies) = tokio::io::duplex(4096);
    let mut runner = Runner {
        commands,
        replies: BufReader::new(replies).lines(),
    };

    let mut bridge = CommandBridge::new(&mut server);
    let served = bridge.serve(BufReader::new(bridge_input), bridge_output);

    let session = async move {
        let reply = runner.send(json!({"command": "onRunStart"})).await?;
        assert_eq!(reply["ok"], true);

        let second = runner.send(json!({"command": "onRunStart"})).await?;
        assert_eq!(second["ok"], false);
        assert!(second["error"].as_str().unwrap().contains("already running"));

        drop(runner);
        anyhow::Ok(())
    };

    let (served, session) = tokio::join!(served, session);
    session?;
    served?;

    assert!(!server.is_running());
    let mut restarted = MockServer::new(port);
    restarted.start().await?;
    restarted.stop().await;
    Ok(())
}

/// A line that is not UTF-8 gets an error reply and later commands still run
#[tokio::test]
async fn test_invalid_utf8_line_is_answered() -> anyhow::Result<()> {
    let port = free_port()?;
    let mut server = MockServer::new(port);

    let (commands, bridge_input) = tokio::io::duplex(4096);
    let (bridge_output, replies) = tokio::io::duplex(4096);
    let mut runner = Runner {
        commands,
        replies: BufReader::new(replies).lines(),
    };

    let mut bridge = CommandBridge::new(&mut server);
    let served = bridge.serve(BufReader::new(bridge_input), bridge_output);

    let session = async move {
        let ack = json!({"ok": true, "result": null});
        assert_eq!(runner.send(json!({"command": "onRunStart"})).await?, ack);

        let garbled = runner.send_bytes(b"\xff\xfe garbage").await?;
        assert_eq!(garbled["ok"], false);
        assert!(garbled["error"].as_str().unwrap().contains("not valid UTF-8"));

        assert_eq!(runner.send(json!({"command": "resetAPIMocks"})).await?, ack);

        drop(runner);
        anyhow::Ok(())
    };

    let (served, session) = tokio::join!(served, session);
    session?;
    served?;
    assert!(!server.is_running());
    Ok(())
}

/// A failing input still stops the server before the error is returned
#[tokio::test]
async fn test_input_failure_stops_server() -> anyhow::Result<()> {
    let port = free_port()?;
    let mut server = MockServer::new(port);

    let input = BufReader::new(BrokenInput {
        pending: b"{\"command\": \"onRunStart\"}\n",
    });
    let result = CommandBridge::new(&mut server)
        .serve(input, tokio::io::sink())
        .await;

    assert!(result.is_err());
    assert!(!server.is_running());

    let mut restarted = MockServer::new(port);
    restarted.start().await?;
    restarted.stop().await;
    Ok(())
}
