/// Runtime Execution Engine
///
/// Reacts to record change events by running the matching workflows:
/// - The dispatcher drains the change queue and spawns one run per workflow
/// - The engine walks the compiled DAG for one event
/// - Conditions and templates read the triggering record

// Condition node evaluation
pub mod condition;

// {{ }} interpolation for action parameters
pub mod template;

pub mod broadcast;

// Core execution engine walking the petgraph DAG
pub mod engine;

// Event queue consumer spawning workflow runs
pub mod dispatcher;

pub use broadcast::{BroadcastMessage, Broadcaster, ChannelBroadcaster};
pub use dispatcher::WorkflowDispatcher;
pub use engine::WorkflowEngine;
