//! # Host Module
//!
//! The JSON-mediated host functions exported into the WASM sandbox, plus
//! the typed wire records they share. Host functions never raise into the
//! guest: every failure is encoded as `{"error": {"type", "message"}}`
//! (the secrets host, whose ABI is a plain string, returns the literal
//! `access-denied: ...` form instead).
//!
//! Imports from `security/` and `core/`.

pub mod formula;
pub mod http;
pub mod mcp;
pub mod protocol;
pub mod secrets;
pub mod stream;

pub use formula::{FormulaHost, FormulaInvoker, ParentInfo};
pub use http::HttpHost;
pub use mcp::{McpHost, McpToolHandler, McpToolRegistry};
pub use secrets::SecretsHost;
pub use stream::{StreamHost, StreamRegistry};
