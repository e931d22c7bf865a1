//! Processing Pipeline
//!
//! Request orchestration on top of the agent, engine, analysis and cache
//! modules.

mod orchestrator;

pub use orchestrator::{
    Orchestrator, PipelineDeps, ProcessRequest, ProcessResponse, Segment,
    UNMAPPED_INSTRUCTION_WARNING,
};
