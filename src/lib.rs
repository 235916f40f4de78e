//! devbridge-gateway: an MCP tool dispatcher and execution substrate for a
//! developer workstation.
//!
//! The server advertises a catalogue of tools over MCP (see [`server`]) and
//! routes each call to one of the components below. Every component owns a
//! serialisation boundary of its own; none share locks with each other.

pub mod aux_server;
pub mod classifier;
pub mod config;
pub mod environment;
pub mod health;
pub mod host;
pub mod output;
pub mod parsers;
pub mod pipeline;
pub mod process;
pub mod results;
pub mod server;
pub mod session;
pub mod snapshot;
pub mod ssh;
pub mod ssh_profile;
pub mod streaming;
pub mod template;
pub mod terminal_exec;
pub mod watch;
pub mod workspace;
