//! MCP dispatcher (§4.G): translates JSON-RPC 2.0 `initialize`, `tools/list`,
//! and `tools/call` into manifest lookups, argument coercion, and serial
//! transactions. This is the single place that maps layer-specific errors
//! onto the JSON-RPC error code table.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::error::DispatchError;
use crate::manifest::ToolDescriptor;
use crate::supervisor::{ConnectionHandle, ConnectionState};
use crate::wire::frame::build_command;
use crate::wire::types::{decode_return, encode_params, WireType, WireValue};

#[cfg(feature = "scripting")]
use crate::tools::script;

const PROTOCOL_VERSION: &str = "2024-11-05";
pub const SERVER_NAME: &str = "serial-mcp-adapter";
pub const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(feature = "scripting")]
pub const EXECUTE_SCRIPT_TOOL: &str = "execute_script";

/// JSON-RPC 2.0 request envelope (§4.G, §6).
#[derive(Debug, Deserialize)]
pub struct JsonRpcRequest {
    #[allow(dead_code)]
    pub jsonrpc: String,
    pub id: Option<Value>,
    pub method: String,
    pub params: Option<Value>,
}

/// JSON-RPC 2.0 response envelope.
#[derive(Debug, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: &'static str,
    pub id: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcErrorBody>,
}

#[derive(Debug, Serialize)]
pub struct JsonRpcErrorBody {
    pub code: i32,
    pub message: String,
}

impl JsonRpcResponse {
    fn ok(id: Option<Value>, result: Value) -> Self {
        JsonRpcResponse { jsonrpc: "2.0", id, result: Some(result), error: None }
    }

    fn err(id: Option<Value>, code: i32, message: impl Into<String>) -> Self {
        JsonRpcResponse {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(JsonRpcErrorBody { code, message: message.into() }),
        }
    }
}

/// Translates MCP JSON-RPC requests into manifest lookups and serial
/// transactions, serializing all device access through `conn` (§4.G).
pub struct Dispatcher {
    conn: ConnectionHandle,
    config: Arc<AppConfig>,
}

impl Dispatcher {
    pub fn new(conn: ConnectionHandle, config: Arc<AppConfig>) -> Self {
        Self { conn, config }
    }

    /// Parses and dispatches one JSON-RPC request body, returning the
    /// response to serialize back to the caller (§4.H).
    pub async fn handle_body(&self, body: &[u8]) -> JsonRpcResponse {
        let req: JsonRpcRequest = match serde_json::from_slice(body) {
            Ok(r) => r,
            Err(e) => {
                return JsonRpcResponse::err(
                    None,
                    crate::error::jsonrpc_code::PARSE_ERROR,
                    format!("parse error: {e}"),
                )
            }
        };
        self.dispatch(req).await
    }

    async fn dispatch(&self, req: JsonRpcRequest) -> JsonRpcResponse {
        match req.method.as_str() {
            "initialize" => self.handle_initialize(req.id, req.params),
            "tools/list" => self.handle_tools_list(req.id),
            "tools/call" => self.handle_tools_call(req.id, req.params).await,
            other => JsonRpcResponse::err(
                req.id,
                crate::error::jsonrpc_code::METHOD_NOT_FOUND,
                format!("method not found: {other}"),
            ),
        }
    }

    fn handle_initialize(&self, id: Option<Value>, params: Option<Value>) -> JsonRpcResponse {
        let protocol_version = params
            .as_ref()
            .and_then(|p| p.get("protocolVersion"))
            .and_then(|v| v.as_str())
            .unwrap_or(PROTOCOL_VERSION);
        JsonRpcResponse::ok(
            id,
            json!({
                "protocolVersion": protocol_version,
                "capabilities": { "tools": {} },
                "serverInfo": { "name": SERVER_NAME, "version": SERVER_VERSION },
            }),
        )
    }

    fn handle_tools_list(&self, id: Option<Value>) -> JsonRpcResponse {
        let state = self.conn.snapshot();
        let manifest = match &state {
            ConnectionState::Ready { manifest, .. } => Some(manifest.clone()),
            _ => None,
        };

        let Some(manifest) = manifest else {
            return JsonRpcResponse::ok(
                id,
                json!({
                    "tools": [],
                    "_status": { "state": state.name(), "message": state.message() },
                }),
            );
        };

        let mut tools: Vec<Value> = manifest.tools().iter().map(tool_to_json).collect();
        #[cfg(feature = "scripting")]
        tools.push(script::tool_listing(self.config.script_timeout_max));
        #[cfg(not(feature = "scripting"))]
        let _ = &self.config;

        JsonRpcResponse::ok(id, json!({ "tools": tools }))
    }

    async fn handle_tools_call(&self, id: Option<Value>, params: Option<Value>) -> JsonRpcResponse {
        let result = self.call_tool(params).await;
        match result {
            Ok(text) => JsonRpcResponse::ok(id, json!({ "content": [{ "type": "text", "text": text }] })),
            Err(e) => {
                warn!(error = %e, "tools/call failed");
                JsonRpcResponse::err(id, e.jsonrpc_code(), e.to_string())
            }
        }
    }

    async fn call_tool(&self, params: Option<Value>) -> Result<String, DispatchError> {
        let params = params.ok_or_else(|| DispatchError::MissingArgument("params".into()))?;
        let name = params
            .get("name")
            .and_then(|v| v.as_str())
            .ok_or_else(|| DispatchError::MissingArgument("name".into()))?;
        let arguments = params.get("arguments").cloned().unwrap_or_else(|| json!({}));

        #[cfg(feature = "scripting")]
        if name == EXECUTE_SCRIPT_TOOL {
            return self.call_execute_script(&arguments).await;
        }

        let state = self.conn.snapshot();
        let manifest = match &state {
            ConnectionState::Ready { manifest, .. } => manifest.clone(),
            other => return Err(DispatchError::NotReady(other.message())),
        };

        let descriptor = manifest.by_name(name)?.clone();
        let values = coerce_arguments(&descriptor, &arguments)?;
        let encoded_args = encode_params(&values)?;
        let command = build_command(descriptor.tag, &encoded_args);
        let command = &command[..command.len() - 1]; // Transactor re-appends the CRC.

        let payload = self.conn.transact(command, self.config.request_timeout).await?;
        let value = decode_return(descriptor.return_type, &payload)?;
        info!(tool = name, "tool call completed");
        Ok(value.render_text())
    }

    #[cfg(feature = "scripting")]
    async fn call_execute_script(&self, arguments: &Value) -> Result<String, DispatchError> {
        let state = self.conn.snapshot();
        let manifest = match &state {
            ConnectionState::Ready { manifest, .. } => manifest.clone(),
            other => return Err(DispatchError::NotReady(other.message())),
        };

        let body = arguments
            .get("script")
            .and_then(|v| v.as_str())
            .ok_or_else(|| DispatchError::MissingArgument("script".into()))?;
        let timeout_ms = arguments
            .get("timeout_ms")
            .and_then(|v| v.as_u64())
            .unwrap_or(self.config.request_timeout.as_millis() as u64);
        if timeout_ms == 0 || Duration::from_millis(timeout_ms) > self.config.script_timeout_max {
            return Err(DispatchError::TimeoutOutOfRange {
                requested_ms: timeout_ms,
                max_ms: self.config.script_timeout_max.as_millis() as u64,
            });
        }

        script::execute(&self.conn, &manifest, body, Duration::from_millis(timeout_ms)).await
    }
}

fn tool_to_json(tool: &ToolDescriptor) -> Value {
    let properties: serde_json::Map<String, Value> = tool
        .parameters
        .iter()
        .map(|(name, ty)| (name.clone(), json!({ "type": ty.json_schema_type() })))
        .collect();
    let required: Vec<&str> = tool.parameters.iter().map(|(name, _)| name.as_str()).collect();

    json!({
        "name": tool.name,
        "description": tool.description,
        "inputSchema": {
            "type": "object",
            "properties": properties,
            "required": required,
        },
    })
}

/// Coerces a `tools/call` JSON arguments object into an ordered [`WireValue`]
/// vector matching `descriptor`'s parameter list, validating each value
/// against its declared type before any bytes are encoded (§4.G, §7).
pub fn coerce_arguments(descriptor: &ToolDescriptor, arguments: &Value) -> Result<Vec<WireValue>, DispatchError> {
    descriptor
        .parameters
        .iter()
        .map(|(name, ty)| {
            let raw = arguments
                .get(name)
                .ok_or_else(|| DispatchError::MissingArgument(name.clone()))?;
            coerce_value(name, *ty, raw)
        })
        .collect()
}

/// Coerces one JSON value into the [`WireValue`] required by `ty`.
pub fn coerce_value(name: &str, ty: WireType, value: &Value) -> Result<WireValue, DispatchError> {
    match ty {
        WireType::I16 => {
            let n = value
                .as_i64()
                .ok_or_else(|| DispatchError::TypeMismatch { name: name.to_string(), expected: "integer" })?;
            i16::try_from(n)
                .map(WireValue::I16)
                .map_err(|_| DispatchError::OutOfRange { name: name.to_string(), ty: "i16", value: n })
        }
        WireType::I32 => {
            let n = value
                .as_i64()
                .ok_or_else(|| DispatchError::TypeMismatch { name: name.to_string(), expected: "integer" })?;
            i32::try_from(n)
                .map(WireValue::I32)
                .map_err(|_| DispatchError::OutOfRange { name: name.to_string(), ty: "i32", value: n })
        }
        WireType::CStr => {
            let s = value
                .as_str()
                .ok_or_else(|| DispatchError::TypeMismatch { name: name.to_string(), expected: "string" })?;
            if s.as_bytes().contains(&0x00) {
                return Err(DispatchError::InteriorNul { name: name.to_string() });
            }
            Ok(WireValue::CStr(s.to_string()))
        }
        WireType::Void => Ok(WireValue::Void),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(params: Vec<(&str, WireType)>) -> ToolDescriptor {
        ToolDescriptor {
            tag: 1,
            name: "blinkLED".into(),
            description: "blink".into(),
            return_type: None,
            parameters: params.into_iter().map(|(n, t)| (n.to_string(), t)).collect(),
        }
    }

    #[test]
    fn coerces_valid_integer_argument() {
        let d = descriptor(vec![("n", WireType::I16)]);
        let values = coerce_arguments(&d, &json!({ "n": 5 })).unwrap();
        assert_eq!(values, vec![WireValue::I16(5)]);
    }

    #[test]
    fn rejects_out_of_range_integer() {
        let d = descriptor(vec![("n", WireType::I16)]);
        let err = coerce_arguments(&d, &json!({ "n": 40000 })).unwrap_err();
        assert!(matches!(err, DispatchError::OutOfRange { .. }));
    }

    #[test]
    fn rejects_missing_argument() {
        let d = descriptor(vec![("n", WireType::I16)]);
        let err = coerce_arguments(&d, &json!({})).unwrap_err();
        assert!(matches!(err, DispatchError::MissingArgument(_)));
    }

    #[test]
    fn rejects_interior_nul_in_string_argument() {
        let d = descriptor(vec![("label", WireType::CStr)]);
        let err = coerce_arguments(&d, &json!({ "label": "a\u{0}b" })).unwrap_err();
        assert!(matches!(err, DispatchError::InteriorNul { .. }));
    }

    #[test]
    fn tool_to_json_lists_all_parameters_as_required() {
        let d = descriptor(vec![("n", WireType::I16), ("label", WireType::CStr)]);
        let v = tool_to_json(&d);
        let required = v["inputSchema"]["required"].as_array().unwrap();
        assert_eq!(required.len(), 2);
    }
}
