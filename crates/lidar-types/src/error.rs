#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("{source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
    #[error("{source}")]
    SerdeJson {
        #[from]
        source: serde_json::Error,
    },
    #[error("{source}")]
    TomlDe {
        #[from]
        source: toml::de::Error,
    },
    #[error("{source}")]
    Zip {
        #[from]
        source: zip::result::ZipError,
    },

    /// Fatal at startup: band inversion, negative rates, missing sensor config.
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    /// Fatal at startup: could not bind the ingest UDP socket.
    #[error("could not bind socket at {addr}: {source}")]
    SocketBindError {
        addr: std::net::SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// Per-packet, logged at a throttled rate, packet dropped.
    #[error("packet decode error: {0}")]
    PacketDecodeError(String),

    /// Frame dropped, counter incremented.
    #[error("frame malformed: {0}")]
    FrameMalformed(String),

    /// Counter only; no per-event log line.
    #[error("backpressure drop")]
    BackpressureDrop,

    /// Counter only; pipeline continues.
    #[error("persistence error: {0}")]
    PersistenceError(String),

    /// Per-track; the track is deleted.
    #[error("numerical instability in track {track_id}")]
    NumericalInstability { track_id: String },

    /// Fatal for the replay session that raised it.
    #[error("replay format error: {0}")]
    ReplayFormatError(String),
}

pub type Result<T> = std::result::Result<T, Error>;
