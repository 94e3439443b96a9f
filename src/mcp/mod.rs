//! Model Context Protocol (MCP) over newline-delimited JSON-RPC on stdio
//!
//! `codec` owns the wire shapes, `server` the dispatcher and handshake state,
//! `client` the subprocess side.

pub mod client;
pub mod codec;
pub mod server;
