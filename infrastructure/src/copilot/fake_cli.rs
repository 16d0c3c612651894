//! In-memory stand-in for the Copilot CLI side of the connection.

use crate::copilot::protocol::CreateSessionParams;
use crate::copilot::router::{MessageRouter, SessionRoute};
use crate::copilot::transport::{read_frame, write_frame};
use pilot_application::PermissionHandler;
use serde_json::{Value, json};
use std::sync::Arc;
use tokio::io::{BufReader, DuplexStream, ReadHalf, WriteHalf};

pub(crate) struct FakeCli {
    reader: BufReader<ReadHalf<DuplexStream>>,
    writer: WriteHalf<DuplexStream>,
    line: String,
    next_ping: u64,
}

impl FakeCli {
    pub(crate) fn pair() -> (Arc<MessageRouter>, FakeCli) {
        let (client_end, cli_end) = tokio::io::duplex(64 * 1024);
        let router = MessageRouter::from_stream(client_end, None);
        let (read, write) = tokio::io::split(cli_end);
        let cli = FakeCli {
            reader: BufReader::new(read),
            writer: write,
            line: String::new(),
            next_ping: 1_000_000,
        };
        (router, cli)
    }

    pub(crate) async fn next_message(&mut self) -> Value {
        let body = read_frame(&mut self.reader, &mut self.line)
            .await
            .unwrap()
            .expect("router closed the connection");
        serde_json::from_slice(&body).unwrap()
    }

    pub(crate) async fn send(&mut self, message: Value) {
        write_frame(&mut self.writer, &message.to_string())
            .await
            .unwrap();
    }

    /// Skip frames until a request for `method` arrives.
    pub(crate) async fn expect_request(&mut self, method: &str) -> (u64, Value) {
        loop {
            let message = self.next_message().await;
            if message["method"] == method
                && let Some(id) = message["id"].as_u64()
            {
                return (id, message["params"].clone());
            }
        }
    }

    pub(crate) async fn respond(&mut self, id: u64, result: Value) {
        self.send(json!({"jsonrpc": "2.0", "id": id, "result": result}))
            .await;
    }

    pub(crate) async fn respond_error(&mut self, id: u64, code: i64, message: &str) {
        self.send(json!({
            "jsonrpc": "2.0", "id": id,
            "error": {"code": code, "message": message}
        }))
        .await;
    }

    pub(crate) async fn emit(&mut self, session_id: &str, event_type: &str, data: Value) {
        self.send(json!({
            "jsonrpc": "2.0",
            "method": "session.event",
            "params": {"sessionId": session_id, "event": {"type": event_type, "data": data}}
        }))
        .await;
    }

    /// Answer the next `session.create`, returning its params.
    pub(crate) async fn accept_create(&mut self, session_id: &str) -> Value {
        let (id, params) = self.expect_request("session.create").await;
        self.emit(session_id, "session.start", json!({"sessionId": session_id}))
            .await;
        self.respond(id, json!({"sessionId": session_id})).await;
        params
    }

    pub(crate) async fn create(
        &mut self,
        router: &Arc<MessageRouter>,
        session_id: &str,
    ) -> Arc<SessionRoute> {
        self.create_with_handler(router, session_id, None).await
    }

    pub(crate) async fn create_with_handler(
        &mut self,
        router: &Arc<MessageRouter>,
        session_id: &str,
        handler: Option<Arc<dyn PermissionHandler>>,
    ) -> Arc<SessionRoute> {
        let creating = {
            let router = Arc::clone(router);
            tokio::spawn(async move {
                router
                    .create_session(CreateSessionParams::default(), handler)
                    .await
            })
        };
        self.accept_create(session_id).await;
        creating.await.unwrap().unwrap()
    }

    /// Issue a `permission.request` and return the router's reply.
    pub(crate) async fn ask_permission(&mut self, id: u64, session_id: &str, request: Value) -> Value {
        self.send(json!({
            "jsonrpc": "2.0", "id": id, "method": "permission.request",
            "params": {"sessionId": session_id, "permissionRequest": request}
        }))
        .await;
        self.reply_to(id).await
    }

    /// Round-trip a request the router cannot serve. Frames are handled in
    /// order, so every earlier event has been dispatched once it returns.
    pub(crate) async fn settle(&mut self) {
        let id = self.next_ping;
        self.next_ping += 1;
        self.send(json!({"jsonrpc": "2.0", "id": id, "method": "test.ping"}))
            .await;
        self.reply_to(id).await;
    }

    async fn reply_to(&mut self, id: u64) -> Value {
        loop {
            let message = self.next_message().await;
            if message["id"] == id && message.get("method").is_none() {
                return message;
            }
        }
    }
}
