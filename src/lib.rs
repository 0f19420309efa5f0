//! Library for ctxmcp: MCP server bridging local projects to a remote
//! codebase-retrieval API.
//!
//! This crate exposes:
//! - `config`: load/save configuration from `~/.ctxmcp/settings.toml`.
//! - `decode`: multi-encoding text file reader.
//! - `indexer`: ignore-aware walk, blob splitting and content addressing.
//! - `registry`: persistent per-project set of uploaded blob identities.
//! - `backend`: REST calls to upload blobs and perform retrieval.
//! - `service`: incremental indexing pass and the `search_context` facade.
//! - `server`: rmcp server with a `search_context` tool.
//! - `web`: optional admin router (health, status, config, search).

pub mod backend;
pub mod config;
pub mod decode;
pub mod error;
pub mod indexer;
pub mod logging;
pub mod registry;
pub mod server;
pub mod service;
pub mod tasks;
pub mod web;

pub use error::BridgeError;
pub use server::BridgeServer;
