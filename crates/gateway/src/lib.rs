//! agentdesk gateway: live agent cache, admission control, the session
//! service behind the HTTP API, and process bootstrap.

pub mod api;
pub mod bootstrap;
pub mod cli;
pub mod runtime;
pub mod secrets;
pub mod state;
