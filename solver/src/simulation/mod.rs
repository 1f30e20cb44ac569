//! Agent simulation on a solved model.
//!
//! - [`engine`]: forward simulation of agent histories and choice shares

pub mod engine;

pub use engine::{simulate, simulate_agent, AgentPeriod, SimulationResult};
