pub mod admission;
pub mod agent;
pub mod agent_cache;
pub mod remote_agent;
pub mod session_service;
pub mod turn_lock;
