//! The per-sensor LiDAR perception pipeline: packet ingest through tracking
//! and bundle publication (§4, §5). Each pipeline stage lives in its own
//! module so it can be driven and tested independently; `pipeline` wires
//! them into the single worker task the rest of the process talks to.

pub mod bundler;
pub mod decoder;
pub mod forwarder;
pub mod frame_builder;
pub mod ingest;
pub mod pipeline;
pub mod stats;
pub mod tracker;

pub use pipeline::{PipelineHandle, PipelineOrchestrator, Persistence, Publisher};
