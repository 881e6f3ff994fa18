//! Wire decoding of sensor UDP packets into `PolarPoint`s.
//!
//! The exact wire format is intentionally opaque above this layer: the rest
//! of the pipeline only consumes `PolarPoint`s and azimuth-wrap events.
//! `Pandar40PDecoder` implements a Hesai-style block/channel layout (two
//! interleaved firing sequences per packet, 40 channels per sequence) typical
//! of the sensor family this crate targets.

use lidar_types::{Error, PolarPoint, Result, TimestampNs, NUM_AZIMUTH_BINS, NUM_RINGS};

/// One decoded measurement channel within a firing sequence.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecodedPoint {
    pub point: PolarPoint,
}

/// Decodes one UDP payload into zero or more points. Implementations must be
/// cheap enough to run inline on the ingest hot path; anything expensive
/// belongs downstream.
pub trait PacketDecoder: Send {
    fn decode(&mut self, payload: &[u8], arrival_ns: TimestampNs) -> Result<Vec<PolarPoint>>;
}

const BLOCKS_PER_PACKET: usize = 2;
const CHANNELS_PER_BLOCK: usize = NUM_RINGS;
const BLOCK_HEADER_LEN: usize = 4;
const CHANNEL_LEN: usize = 3; // 2 bytes range (0.1mm units) + 1 byte reflectivity
const BLOCK_LEN: usize = BLOCK_HEADER_LEN + CHANNELS_PER_BLOCK * CHANNEL_LEN;
const MIN_PACKET_LEN: usize = BLOCKS_PER_PACKET * BLOCK_LEN;
const BLOCK_FLAG: u16 = 0xEEFF;
const RANGE_UNIT_M: f64 = 0.0001;
const DEG_PER_BIN: f64 = 360.0 / NUM_AZIMUTH_BINS as f64;

/// Simplified decoder for the Pandar40P-class wire format: each packet
/// carries `BLOCKS_PER_PACKET` firing blocks, each block a 2-byte flag, a
/// 2-byte azimuth (hundredths of a degree), and `NUM_RINGS` 3-byte channels
/// (2-byte range in 0.1mm units, 1-byte reflectivity).
#[derive(Debug, Default)]
pub struct Pandar40PDecoder {
    scratch: Vec<PolarPoint>,
}

impl Pandar40PDecoder {
    pub fn new() -> Self {
        Self { scratch: Vec::with_capacity(BLOCKS_PER_PACKET * CHANNELS_PER_BLOCK) }
    }
}

impl PacketDecoder for Pandar40PDecoder {
    fn decode(&mut self, payload: &[u8], arrival_ns: TimestampNs) -> Result<Vec<PolarPoint>> {
        if payload.len() < MIN_PACKET_LEN {
            return Err(Error::PacketDecodeError(format!(
                "packet too short: {} bytes, need at least {MIN_PACKET_LEN}",
                payload.len()
            )));
        }

        self.scratch.clear();
        for block_idx in 0..BLOCKS_PER_PACKET {
            let block = &payload[block_idx * BLOCK_LEN..(block_idx + 1) * BLOCK_LEN];
            let flag = u16::from_le_bytes([block[0], block[1]]);
            if flag != BLOCK_FLAG {
                return Err(Error::PacketDecodeError(format!(
                    "bad block flag 0x{flag:04x} in block {block_idx}"
                )));
            }
            let azimuth_hundredths = u16::from_le_bytes([block[2], block[3]]);
            let azimuth_deg = azimuth_hundredths as f64 / 100.0;
            let azimuth_bin = ((azimuth_deg / DEG_PER_BIN).round() as i64)
                .rem_euclid(NUM_AZIMUTH_BINS as i64) as u16;

            for ring in 0..CHANNELS_PER_BLOCK {
                let off = BLOCK_HEADER_LEN + ring * CHANNEL_LEN;
                let raw_range = u16::from_le_bytes([block[off], block[off + 1]]);
                let reflectivity = block[off + 2];
                if raw_range == 0 {
                    // Channel reported no return this firing; not an error.
                    continue;
                }
                self.scratch.push(PolarPoint {
                    ring: ring as u8,
                    azimuth_bin,
                    range_m: (raw_range as f64 * RANGE_UNIT_M) as f32,
                    intensity: reflectivity,
                    t_ns: arrival_ns,
                });
            }
        }

        Ok(std::mem::take(&mut self.scratch))
    }
}

/// No-op decoder for the `no_parse` diagnostic mode: counts packets without
/// attempting to interpret payload bytes.
#[derive(Debug, Default)]
pub struct NullDecoder;

impl PacketDecoder for NullDecoder {
    fn decode(&mut self, _payload: &[u8], _arrival_ns: TimestampNs) -> Result<Vec<PolarPoint>> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_block(azimuth_hundredths: u16, ranges: &[u16]) -> Vec<u8> {
        let mut block = Vec::with_capacity(BLOCK_LEN);
        block.extend_from_slice(&BLOCK_FLAG.to_le_bytes());
        block.extend_from_slice(&azimuth_hundredths.to_le_bytes());
        for &r in ranges {
            block.extend_from_slice(&r.to_le_bytes());
            block.push(100); // reflectivity
        }
        block
    }

    #[test]
    fn decodes_two_blocks_of_nonzero_channels() {
        let ranges: Vec<u16> = (0..NUM_RINGS as u16).map(|i| 1000 + i).collect();
        let mut payload = make_block(0, &ranges);
        payload.extend(make_block(2000, &ranges));

        let mut decoder = Pandar40PDecoder::new();
        let points = decoder.decode(&payload, TimestampNs(0)).unwrap();
        assert_eq!(points.len(), 2 * NUM_RINGS);
        assert_eq!(points[0].azimuth_bin, 0);
        assert!((points[NUM_RINGS].azimuth_bin as f64 - 2000.0 / 100.0 / DEG_PER_BIN).abs() < 1.0);
    }

    #[test]
    fn zero_range_channel_is_skipped() {
        let mut ranges: Vec<u16> = vec![1000; NUM_RINGS];
        ranges[3] = 0;
        let mut payload = make_block(0, &ranges);
        payload.extend(make_block(0, &ranges));
        let mut decoder = Pandar40PDecoder::new();
        let points = decoder.decode(&payload, TimestampNs(0)).unwrap();
        assert_eq!(points.len(), 2 * (NUM_RINGS - 1));
    }

    #[test]
    fn truncated_payload_errors() {
        let mut decoder = Pandar40PDecoder::new();
        assert!(decoder.decode(&[0u8; 10], TimestampNs(0)).is_err());
    }

    #[test]
    fn bad_flag_errors() {
        let ranges: Vec<u16> = vec![1000; NUM_RINGS];
        let mut payload = make_block(0, &ranges);
        payload[0] = 0x00;
        payload.extend(make_block(0, &ranges));
        let mut decoder = Pandar40PDecoder::new();
        assert!(decoder.decode(&payload, TimestampNs(0)).is_err());
    }
}
