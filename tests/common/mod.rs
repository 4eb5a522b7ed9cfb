#![allow(dead_code)]

//! Shared harness for the changes-client integration tests.
//!
//! Stands in for a NimbusDB node with an in-memory transport: every
//! accepted connection hands the test a [`ServerConnection`] through which
//! it can read the client's command frames and script the server's
//! responses.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::channel::mpsc as channel;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::tungstenite::Error as WsError;

use nimbus_link::{
    ChangesTransport, ConnectionOptions, DatabaseChanges, DatabaseChangesBuilder,
    NimbusLinkError, NimbusLinkTimeouts, Result, StaticEndpoint, WireSink, WireStream,
};

/// The server's end of one accepted connection.
pub struct ServerConnection {
    pub url: String,
    to_client: channel::UnboundedSender<std::result::Result<Message, WsError>>,
    from_client: channel::UnboundedReceiver<Message>,
}

impl ServerConnection {
    /// Receive the next command frame as `(command_id, command, param)`.
    pub async fn expect_command(&mut self) -> (u64, String, String) {
        let message = tokio::time::timeout(Duration::from_secs(5), self.from_client.next())
            .await
            .expect("timed out waiting for a command")
            .expect("client hung up");
        let text = match message {
            Message::Text(text) => text.to_string(),
            other => panic!("expected a text frame, got {:?}", other),
        };
        let value: serde_json::Value =
            serde_json::from_str(&text).expect("command frame is not valid JSON");
        (
            value["CommandId"].as_u64().expect("CommandId missing"),
            value["Command"].as_str().expect("Command missing").to_string(),
            value["Param"].as_str().unwrap_or_default().to_string(),
        )
    }

    /// Receive `count` command frames, sorted by command id.
    pub async fn expect_commands(&mut self, count: usize) -> Vec<(u64, String, String)> {
        let mut commands = Vec::with_capacity(count);
        for _ in 0..count {
            commands.push(self.expect_command().await);
        }
        commands.sort_by_key(|(id, _, _)| *id);
        commands
    }

    /// Assert that no command arrives within the given window.
    pub async fn expect_no_command(&mut self, window: Duration) {
        if let Ok(frame) = tokio::time::timeout(window, self.from_client.next()).await {
            panic!("unexpected frame from client: {:?}", frame);
        }
    }

    /// Send a batch of frames to the client.
    pub fn send_frames(&self, frames: &[serde_json::Value]) {
        let text = serde_json::to_string(frames).expect("frames serialize");
        self.to_client
            .unbounded_send(Ok(Message::text(text)))
            .expect("client reader gone");
    }

    /// Send raw text to the client, bypassing frame construction.
    pub fn send_raw(&self, text: &str) {
        self.to_client
            .unbounded_send(Ok(Message::text(text)))
            .expect("client reader gone");
    }

    /// Confirm a previously received command.
    pub fn confirm(&self, command_id: u64) {
        self.send_frames(&[json!({ "Type": "Confirm", "CommandId": command_id })]);
    }

    /// Receive one command and confirm it immediately.
    pub async fn confirm_next(&mut self) -> (u64, String, String) {
        let command = self.expect_command().await;
        self.confirm(command.0);
        command
    }

    pub fn send_document_put(&self, id: &str, collection: &str) {
        self.send_frames(&[document_put_frame(id, collection)]);
    }

    pub fn send_error(&self, message: &str) {
        self.send_frames(&[json!({ "Type": "Error", "Error": message })]);
    }

    /// Kill the connection from the server side.
    pub fn drop_connection(self) {}
}

pub fn document_put_frame(id: &str, collection: &str) -> serde_json::Value {
    json!({
        "Type": "DocumentChange",
        "Value": {
            "Type": "Put",
            "Id": id,
            "CollectionName": collection,
            "TypeName": "",
            "ChangeVector": "A:1",
        },
    })
}

pub fn index_change_frame(name: &str, kind: &str) -> serde_json::Value {
    json!({
        "Type": "IndexChange",
        "Value": { "Type": kind, "Name": name, "Etag": 1 },
    })
}

pub fn operation_status_frame(operation_id: i64, status: &str) -> serde_json::Value {
    json!({
        "Type": "OperationStatusChange",
        "Value": { "OperationId": operation_id, "State": { "Status": status } },
    })
}

/// In-memory transport; each accept yields a [`ServerConnection`].
pub struct MockTransport {
    accepted: tokio::sync::mpsc::UnboundedSender<ServerConnection>,
    refusals_left: AtomicUsize,
}

#[async_trait::async_trait]
impl ChangesTransport for MockTransport {
    async fn connect(&self, url: &str) -> Result<(WireSink, WireStream)> {
        let refusals = self.refusals_left.load(Ordering::SeqCst);
        if refusals > 0 {
            self.refusals_left.store(refusals - 1, Ordering::SeqCst);
            return Err(NimbusLinkError::WebSocket("connection refused".to_string()));
        }

        let (client_tx, from_client) = channel::unbounded::<Message>();
        let (to_client, client_rx) = channel::unbounded();
        self.accepted
            .send(ServerConnection { url: url.to_string(), to_client, from_client })
            .map_err(|_| NimbusLinkError::WebSocket("test server shut down".to_string()))?;

        let sink: WireSink = Box::pin(client_tx.sink_map_err(|_| WsError::ConnectionClosed));
        let stream: WireStream = Box::pin(client_rx);
        Ok((sink, stream))
    }
}

/// Build a mock transport refusing the first `refusals` connection attempts.
pub fn mock_transport(
    refusals: usize,
) -> (Arc<MockTransport>, tokio::sync::mpsc::UnboundedReceiver<ServerConnection>) {
    let (accepted_tx, accepted_rx) = tokio::sync::mpsc::unbounded_channel();
    let transport = Arc::new(MockTransport {
        accepted: accepted_tx,
        refusals_left: AtomicUsize::new(refusals),
    });
    (transport, accepted_rx)
}

/// A builder preconfigured for tests: mock endpoint, short timeouts, fast
/// reconnects.
pub fn test_builder(transport: Arc<MockTransport>) -> DatabaseChangesBuilder {
    DatabaseChanges::builder()
        .database("northwind")
        .resolver(Arc::new(StaticEndpoint::new("http://localhost:8080")))
        .transport(transport)
        .timeouts(NimbusLinkTimeouts::fast())
        .connection_options(
            ConnectionOptions::default()
                .with_reconnect_delay_ms(10)
                .with_max_reconnect_delay_ms(100),
        )
}

/// A client with its first connection already accepted.
pub async fn connected_client() -> (
    DatabaseChanges,
    ServerConnection,
    tokio::sync::mpsc::UnboundedReceiver<ServerConnection>,
) {
    let (transport, mut accepted) = mock_transport(0);
    let changes = test_builder(transport).build().expect("client builds");
    let server = tokio::time::timeout(Duration::from_secs(5), accepted.recv())
        .await
        .expect("timed out waiting for the connection")
        .expect("transport dropped");
    changes.ensure_connected_now().await.expect("connects");
    (changes, server, accepted)
}

/// Poll until `condition` holds or five seconds pass.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        if tokio::time::Instant::now() > deadline {
            panic!("condition not met within 5s");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
