//! Optional sub-tools layered on top of the dispatcher (§4.K). Each module
//! here registers like any ordinary MCP tool; none of them open a second
//! transport to the device.

#[cfg(feature = "scripting")]
pub mod script;
