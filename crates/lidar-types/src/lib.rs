//! Shared data model for the LiDAR perception pipeline: packet/frame/cluster/
//! track/bundle types, identifiers, timestamps and configuration structs.
//! Every other crate in the workspace depends on this one and nothing in it
//! depends back.

mod bundle;
mod cluster;
mod config;
mod error;
mod frame;
mod ids;
mod points;
mod timestamp;
mod track;

pub use bundle::{
    ClusterSet, DebugOverlay, DecimationMode, FrameBundle, FrameType, PointCloudPayload, TrackSet,
};
pub use cluster::{Aabb, Cluster, HeadingSource, Obb};
pub use config::{
    BackgroundParams, ClusterParams, CoreConfig, GroundParams, ObbParams, PipelineParams,
    RuntimeParams, SensorPose, TrackerParams,
};
pub use error::{Error, Result};
pub use frame::Frame;
pub use ids::{ClusterId, FrameId, SensorId, TrackId};
pub use points::{CartesianPoint, PolarPoint, WorldPoint, NUM_AZIMUTH_BINS, NUM_RINGS};
pub use timestamp::TimestampNs;
pub use track::{SpeedHistory, Track, TrackObservation, TrackState};
