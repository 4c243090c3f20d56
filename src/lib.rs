//! stdio-bridge - expose a line-delimited JSON-RPC stdio child over HTTP.

pub mod bridge;
pub mod config;
pub mod http;
pub mod process;
pub mod rpc;
