use serde::{Deserialize, Serialize};

/// Monotonic per-sensor frame counter. Strictly ascending within one pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FrameId(pub u64);

impl std::fmt::Display for FrameId {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.0, f)
    }
}

impl FrameId {
    pub fn next(self) -> Self {
        FrameId(self.0 + 1)
    }
}

/// Identifies a physical sensor. Stable across restarts (configured, not generated).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SensorId(pub String);

impl std::fmt::Display for SensorId {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.0, f)
    }
}

impl SensorId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Frame-local cluster identity. Re-assigned every frame in deterministic
/// `(centroid.x, centroid.y)` order; never persisted across frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ClusterId(pub u32);

/// Globally unique 128-bit track identity, rendered as `trk_<hex>`.
///
/// Generated once at track birth from the process RNG and never reused, even
/// across pipeline restarts (the probability of collision across restarts is
/// negligible for 128 bits of entropy).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TrackId(pub u128);

impl TrackId {
    pub fn new_random() -> Self {
        use rand::RngCore;
        let mut bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut bytes);
        TrackId(u128::from_be_bytes(bytes))
    }
}

impl std::fmt::Display for TrackId {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "trk_{:032x}", self.0)
    }
}

impl std::fmt::Debug for TrackId {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "TrackId({self})")
    }
}

impl Serialize for TrackId {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for TrackId {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let hex = s.strip_prefix("trk_").unwrap_or(&s);
        let val = u128::from_str_radix(hex, 16).map_err(serde::de::Error::custom)?;
        Ok(TrackId(val))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn track_id_round_trips_through_display() {
        let id = TrackId::new_random();
        let s = id.to_string();
        assert!(s.starts_with("trk_"));
        assert_eq!(s.len(), 4 + 32);
    }

    #[test]
    fn two_random_track_ids_differ() {
        assert_ne!(TrackId::new_random(), TrackId::new_random());
    }
}
