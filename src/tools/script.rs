//! The `execute_script` MCP tool (§4.K): a `rhai` interpreter with the
//! current manifest's tools exposed as callable bindings, each invocation
//! routed through the same [`ConnectionHandle::transact`] mutex a direct
//! `tools/call` would use.

use std::time::Duration;

use rhai::{Dynamic, Engine, Map, Scope};
use serde_json::{json, Value};
use tracing::debug;

use crate::dispatcher::coerce_arguments;
use crate::error::DispatchError;
use crate::manifest::Manifest;
use crate::supervisor::ConnectionHandle;
use crate::wire::frame::build_command;
use crate::wire::types::{decode_return, encode_params};

/// JSON Schema listing for `tools/list`, advertised alongside the manifest's
/// own tools whenever the `scripting` feature is compiled in.
pub fn tool_listing(script_timeout_max: Duration) -> Value {
    json!({
        "name": crate::dispatcher::EXECUTE_SCRIPT_TOOL,
        "description": "Run a script against the device's exposed tools.",
        "inputSchema": {
            "type": "object",
            "properties": {
                "script": { "type": "string" },
                "timeout_ms": {
                    "type": "integer",
                    "maximum": script_timeout_max.as_millis() as u64,
                },
            },
            "required": ["script"],
        },
    })
}

/// Evaluates `body` with every tool in `manifest` bound as a callable
/// function, bounded by `timeout`. Returns the rendered text of the
/// script's final expression.
pub async fn execute(
    conn: &ConnectionHandle,
    manifest: &Manifest,
    body: &str,
    timeout: Duration,
) -> Result<String, DispatchError> {
    let conn = conn.clone();
    let manifest = manifest.clone();
    let body = body.to_string();

    let join = tokio::task::spawn_blocking(move || run_script(&conn, &manifest, &body));
    match tokio::time::timeout(timeout, join).await {
        Ok(Ok(result)) => result,
        Ok(Err(_)) => Err(DispatchError::NotReady("script task panicked".into())),
        Err(_) => Err(DispatchError::Transact(crate::error::TransactError::Timeout)),
    }
}

/// Runs synchronously on a blocking-pool thread; every bound tool call
/// blocks on the async transactor via [`tokio::runtime::Handle::block_on`],
/// which is sound here precisely because this closure never runs on a
/// worker thread that `block_on` would itself need to make progress.
fn run_script(conn: &ConnectionHandle, manifest: &Manifest, body: &str) -> Result<String, DispatchError> {
    let mut engine = Engine::new();
    let handle = tokio::runtime::Handle::current();

    for tool in manifest.tools() {
        let tool = tool.clone();
        let conn = conn.clone();
        let handle = handle.clone();
        engine.register_fn(tool.name.clone().as_str(), move |args: Map| -> Dynamic {
            let json_args = map_to_json(&args);
            match call_bound_tool(&handle, &conn, &tool, &json_args) {
                Ok(text) => Dynamic::from(text),
                Err(e) => {
                    debug!(tool = %tool.name, error = %e, "bound tool call failed inside script");
                    Dynamic::from(format!("error: {e}"))
                }
            }
        });
    }

    let mut scope = Scope::new();
    let result: Dynamic = engine
        .eval_with_scope(&mut scope, body)
        .map_err(|e| DispatchError::NotReady(format!("script error: {e}")))?;
    Ok(result.to_string())
}

fn call_bound_tool(
    handle: &tokio::runtime::Handle,
    conn: &ConnectionHandle,
    tool: &crate::manifest::ToolDescriptor,
    arguments: &Value,
) -> Result<String, DispatchError> {
    let values = coerce_arguments(tool, arguments)?;
    let encoded_args = encode_params(&values)?;
    let command = build_command(tool.tag, &encoded_args);
    let command = &command[..command.len() - 1];

    let payload = handle.block_on(conn.transact(command, Duration::from_secs(30)))?;
    let value = decode_return(tool.return_type, &payload)?;
    Ok(value.render_text())
}

fn map_to_json(map: &Map) -> Value {
    let object = map
        .iter()
        .map(|(k, v)| (k.to_string(), dynamic_to_json(v)))
        .collect();
    Value::Object(object)
}

fn dynamic_to_json(d: &Dynamic) -> Value {
    if let Some(n) = d.clone().try_cast::<i64>() {
        json!(n)
    } else if let Some(f) = d.clone().try_cast::<f64>() {
        json!(f)
    } else if let Some(b) = d.clone().try_cast::<bool>() {
        json!(b)
    } else if let Some(s) = d.clone().try_cast::<rhai::ImmutableString>() {
        json!(s.to_string())
    } else {
        Value::Null
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_to_json_converts_scalar_fields() {
        let mut map = Map::new();
        map.insert("n".into(), Dynamic::from(5_i64));
        map.insert("label".into(), Dynamic::from("hi".to_string()));
        let v = map_to_json(&map);
        assert_eq!(v["n"], json!(5));
        assert_eq!(v["label"], json!("hi"));
    }

    #[test]
    fn tool_listing_embeds_timeout_ceiling() {
        let v = tool_listing(Duration::from_secs(300));
        assert_eq!(v["inputSchema"]["properties"]["timeout_ms"]["maximum"], json!(300_000));
    }
}
