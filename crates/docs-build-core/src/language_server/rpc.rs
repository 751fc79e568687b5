//! JSON-RPC 2.0 messages with LSP `Content-Length` framing.

use docs_build_domain::{DocsError, DocsResult};
use serde_json::{json, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const METHOD_NOT_FOUND: i64 = -32601;

fn rpc_error(message: String) -> DocsError {
    DocsError::LanguageServer { message }
}

/// One decoded JSON-RPC message.
#[derive(Debug, Clone, PartialEq)]
pub enum RpcMessage {
    Request {
        id: Value,
        method: String,
        params: Value,
    },
    Notification {
        method: String,
        params: Value,
    },
    Response {
        id: Value,
        result: Option<Value>,
        error: Option<Value>,
    },
}

impl RpcMessage {
    pub fn from_value(mut value: Value) -> Option<Self> {
        let object = value.as_object_mut()?;
        let params = object.remove("params").unwrap_or(Value::Null);
        let id = object.remove("id");
        match (object.remove("method"), id) {
            (Some(Value::String(method)), Some(id)) => Some(RpcMessage::Request { id, method, params }),
            (Some(Value::String(method)), None) => Some(RpcMessage::Notification { method, params }),
            (None, Some(id)) => Some(RpcMessage::Response {
                id,
                result: object.remove("result"),
                error: object.remove("error"),
            }),
            _ => None,
        }
    }
}

pub fn request(id: i64, method: &str, params: Value) -> Value {
    json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params})
}

pub fn notification(method: &str, params: Value) -> Value {
    json!({"jsonrpc": "2.0", "method": method, "params": params})
}

pub fn response(id: &Value, result: Value) -> Value {
    json!({"jsonrpc": "2.0", "id": id, "result": result})
}

pub fn error_response(id: &Value, code: i64, message: &str) -> Value {
    json!({"jsonrpc": "2.0", "id": id, "error": {"code": code, "message": message}})
}

/// Read one framed message. `None` at end of stream.
pub async fn read_message<R>(reader: &mut R) -> DocsResult<Option<Value>>
where
    R: AsyncBufRead + Unpin,
{
    let mut content_length = None;
    loop {
        let mut line = String::new();
        let read = reader
            .read_line(&mut line)
            .await
            .map_err(|e| rpc_error(format!("failed to read header: {e}")))?;
        if read == 0 {
            return if content_length.is_none() {
                Ok(None)
            } else {
                Err(rpc_error("stream ended inside a message header".to_string()))
            };
        }
        let line = line.trim();
        if line.is_empty() {
            if content_length.is_some() {
                break;
            }
            continue;
        }
        if let Some((name, value)) = line.split_once(':') {
            if name.trim().eq_ignore_ascii_case("content-length") {
                let length = value
                    .trim()
                    .parse::<usize>()
                    .map_err(|e| rpc_error(format!("invalid Content-Length {value:?}: {e}")))?;
                content_length = Some(length);
            }
        }
    }

    let mut body = vec![0u8; content_length.unwrap_or_default()];
    reader
        .read_exact(&mut body)
        .await
        .map_err(|e| rpc_error(format!("failed to read message body: {e}")))?;
    serde_json::from_slice(&body)
        .map(Some)
        .map_err(|e| rpc_error(format!("invalid JSON-RPC message: {e}")))
}

pub async fn write_message<W>(writer: &mut W, message: &Value) -> DocsResult<()>
where
    W: AsyncWrite + Unpin,
{
    let body = message.to_string();
    let framed = format!("Content-Length: {}\r\n\r\n{}", body.len(), body);
    writer
        .write_all(framed.as_bytes())
        .await
        .map_err(|e| rpc_error(format!("failed to write message: {e}")))?;
    writer
        .flush()
        .await
        .map_err(|e| rpc_error(format!("failed to flush message: {e}")))
}
