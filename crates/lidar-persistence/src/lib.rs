//! §6 persisted state: a `rusqlite`-backed implementation of
//! `lidar_core::pipeline::Persistence`. Writes happen on a dedicated OS
//! thread so a slow disk never stalls the pipeline worker; the caller-facing
//! `record_tracks` only ever does a non-blocking channel send.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use lidar_core::pipeline::Persistence;
use lidar_types::{Error, Result, TimestampNs, Track, TrackState};

const CHANNEL_CAPACITY: usize = 4096;
const FLUSH_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Default)]
pub struct PersistenceStats {
    pub track_rows_written: AtomicU64,
    pub observation_rows_written: AtomicU64,
    pub queue_full_drops: AtomicU64,
    pub write_errors: AtomicU64,
}

enum PersistenceMsg {
    Tracks { tracks: Vec<Track>, t_ns: TimestampNs },
}

/// Handle shared with the pipeline worker; cloning shares the same writer
/// thread and channel.
#[derive(Clone)]
pub struct SqlitePersistence {
    tx: crossbeam_channel::Sender<PersistenceMsg>,
    stats: Arc<PersistenceStats>,
}

impl SqlitePersistence {
    /// Opens (creating if absent) the database at `db_path`, creates the
    /// schema if missing, and spawns the writer thread. Returns the handle
    /// plus a join handle the caller can use to wait for a clean shutdown
    /// after dropping the handle (closing the channel stops the thread).
    pub fn open(db_path: &Path) -> Result<(Self, std::thread::JoinHandle<()>)> {
        let conn = rusqlite::Connection::open(db_path)
            .map_err(|e| Error::PersistenceError(format!("opening {}: {e}", db_path.display())))?;
        create_schema(&conn)
            .map_err(|e| Error::PersistenceError(format!("creating schema: {e}")))?;

        let (tx, rx) = crossbeam_channel::bounded(CHANNEL_CAPACITY);
        let stats = Arc::new(PersistenceStats::default());
        let thread_stats = stats.clone();

        let join = std::thread::Builder::new()
            .name("lidar-persistence-writer".into())
            .spawn(move || writer_thread_main(conn, rx, thread_stats))
            .expect("spawning persistence writer thread");

        Ok((Self { tx, stats }, join))
    }

    pub fn stats(&self) -> &Arc<PersistenceStats> {
        &self.stats
    }
}

impl Persistence for SqlitePersistence {
    fn record_tracks(&self, tracks: &[Track], t_ns: TimestampNs) {
        if tracks.is_empty() {
            return;
        }
        let msg = PersistenceMsg::Tracks {
            tracks: tracks.to_vec(),
            t_ns,
        };
        if self.tx.try_send(msg).is_err() {
            self.stats.queue_full_drops.fetch_add(1, Ordering::Relaxed);
        }
    }
}

fn create_schema(conn: &rusqlite::Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS lidar_tracks (
            track_id TEXT PRIMARY KEY,
            sensor_id TEXT NOT NULL,
            state TEXT NOT NULL,
            first_ns INTEGER NOT NULL,
            last_ns INTEGER NOT NULL,
            avg_speed_mps REAL NOT NULL,
            peak_speed_mps REAL NOT NULL,
            p50_speed_mps REAL NOT NULL,
            p85_speed_mps REAL NOT NULL,
            p95_speed_mps REAL NOT NULL,
            bbox_length REAL NOT NULL,
            bbox_width REAL NOT NULL,
            bbox_height REAL NOT NULL,
            bbox_heading_rad REAL NOT NULL,
            class_label TEXT NOT NULL,
            class_confidence REAL NOT NULL
        );
        CREATE TABLE IF NOT EXISTS lidar_track_obs (
            track_id TEXT NOT NULL,
            t_ns INTEGER NOT NULL,
            x REAL NOT NULL,
            y REAL NOT NULL,
            z REAL NOT NULL,
            vx REAL NOT NULL,
            vy REAL NOT NULL,
            vz REAL NOT NULL,
            bbox_length REAL NOT NULL,
            bbox_width REAL NOT NULL,
            bbox_height REAL NOT NULL,
            bbox_heading_rad REAL NOT NULL,
            pose_id INTEGER
        );
        CREATE INDEX IF NOT EXISTS lidar_track_obs_by_track_and_time
            ON lidar_track_obs (track_id, t_ns);
        CREATE INDEX IF NOT EXISTS lidar_track_obs_by_sensor_and_time
            ON lidar_track_obs (track_id);",
    )
}

fn state_label(state: TrackState) -> &'static str {
    match state {
        TrackState::Tentative => "tentative",
        TrackState::Confirmed => "confirmed",
        TrackState::Deleted => "deleted",
    }
}

/// Upserts the track's current rollup row, and — only when `misses == 0`, so
/// coasted (unassociated) frames never produce an observation — appends one
/// `lidar_track_obs` row (§8 "coasted observations never persisted").
fn write_track(
    tx: &rusqlite::Transaction,
    track: &Track,
    stats: &PersistenceStats,
) -> rusqlite::Result<()> {
    let track_id = track.track_id.to_string();
    let obb = &track.obb_smoothed;

    tx.execute(
        "INSERT INTO lidar_tracks (
            track_id, sensor_id, state, first_ns, last_ns,
            avg_speed_mps, peak_speed_mps, p50_speed_mps, p85_speed_mps, p95_speed_mps,
            bbox_length, bbox_width, bbox_height, bbox_heading_rad,
            class_label, class_confidence
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
        ON CONFLICT(track_id) DO UPDATE SET
            state = excluded.state,
            last_ns = excluded.last_ns,
            avg_speed_mps = excluded.avg_speed_mps,
            peak_speed_mps = excluded.peak_speed_mps,
            p50_speed_mps = excluded.p50_speed_mps,
            p85_speed_mps = excluded.p85_speed_mps,
            p95_speed_mps = excluded.p95_speed_mps,
            bbox_length = excluded.bbox_length,
            bbox_width = excluded.bbox_width,
            bbox_height = excluded.bbox_height,
            bbox_heading_rad = excluded.bbox_heading_rad,
            class_label = excluded.class_label,
            class_confidence = excluded.class_confidence",
        rusqlite::params![
            track_id,
            track.sensor_id.as_str(),
            state_label(track.state),
            track.first_ns.0,
            track.last_ns.0,
            track.speed_history.mean(),
            track.speed_history.peak(),
            track.speed_history.percentile(0.50),
            track.speed_history.percentile(0.85),
            track.speed_history.percentile(0.95),
            obb.length,
            obb.width,
            obb.height,
            obb.heading_rad,
            track.class_label,
            track.class_confidence as f64,
        ],
    )?;
    stats.track_rows_written.fetch_add(1, Ordering::Relaxed);

    if track.misses == 0 {
        let [x, y, vx, vy] = track.kalman_state;
        tx.execute(
            "INSERT INTO lidar_track_obs (
                track_id, t_ns, x, y, z, vx, vy, vz,
                bbox_length, bbox_width, bbox_height, bbox_heading_rad, pose_id
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, NULL)",
            rusqlite::params![
                track_id, track.last_ns.0, x, y, obb.cz, vx, vy, 0.0_f64, obb.length, obb.width,
                obb.height, obb.heading_rad,
            ],
        )?;
        stats
            .observation_rows_written
            .fetch_add(1, Ordering::Relaxed);
    }

    Ok(())
}

fn writer_thread_main(
    mut conn: rusqlite::Connection,
    rx: crossbeam_channel::Receiver<PersistenceMsg>,
    stats: Arc<PersistenceStats>,
) {
    loop {
        let msg = match rx.recv_timeout(FLUSH_INTERVAL) {
            Ok(msg) => msg,
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => continue,
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
        };

        let PersistenceMsg::Tracks { tracks, .. } = msg;

        let result = (|| -> rusqlite::Result<()> {
            let tx = conn.transaction()?;
            for track in &tracks {
                write_track(&tx, track, &stats)?;
            }
            tx.commit()
        })();

        if let Err(e) = result {
            stats.write_errors.fetch_add(1, Ordering::Relaxed);
            warn!(error = %e, "lidar-persistence write failed, dropping this batch");
        }
    }
    info!("persistence writer thread stopped");
}

/// One row of `GET /api/lidar/tracks/history`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct TrackHistoryRow {
    pub track_id: String,
    pub t_ns: i64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub vx: f64,
    pub vy: f64,
    pub vz: f64,
    pub bbox_length: f64,
    pub bbox_width: f64,
    pub bbox_height: f64,
    pub bbox_heading_rad: f64,
}

/// Read-only query surface over the same database `SqlitePersistence`
/// writes to. Opened separately (its own `rusqlite::Connection`) so the
/// admin API's history endpoint never contends with the writer thread's
/// transactions beyond SQLite's own locking.
pub struct HistoryReader {
    conn: rusqlite::Connection,
}

impl HistoryReader {
    pub fn open(db_path: &Path) -> Result<Self> {
        let conn = rusqlite::Connection::open_with_flags(
            db_path,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY,
        )
        .map_err(|e| Error::PersistenceError(format!("opening {}: {e}", db_path.display())))?;
        Ok(Self { conn })
    }

    /// Observations for `sensor_id` (via a join on `lidar_tracks`) within
    /// `[start_ns, end_ns]` inclusive, ordered oldest first.
    pub fn query_track_history(
        &self,
        sensor_id: &str,
        start_ns: i64,
        end_ns: i64,
    ) -> Result<Vec<TrackHistoryRow>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT o.track_id, o.t_ns, o.x, o.y, o.z, o.vx, o.vy, o.vz,
                        o.bbox_length, o.bbox_width, o.bbox_height, o.bbox_heading_rad
                 FROM lidar_track_obs o
                 JOIN lidar_tracks t ON t.track_id = o.track_id
                 WHERE t.sensor_id = ?1 AND o.t_ns BETWEEN ?2 AND ?3
                 ORDER BY o.t_ns ASC",
            )
            .map_err(|e| Error::PersistenceError(e.to_string()))?;

        let rows = stmt
            .query_map(rusqlite::params![sensor_id, start_ns, end_ns], |r| {
                Ok(TrackHistoryRow {
                    track_id: r.get(0)?,
                    t_ns: r.get(1)?,
                    x: r.get(2)?,
                    y: r.get(3)?,
                    z: r.get(4)?,
                    vx: r.get(5)?,
                    vy: r.get(6)?,
                    vz: r.get(7)?,
                    bbox_length: r.get(8)?,
                    bbox_width: r.get(9)?,
                    bbox_height: r.get(10)?,
                    bbox_heading_rad: r.get(11)?,
                })
            })
            .map_err(|e| Error::PersistenceError(e.to_string()))?;

        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| Error::PersistenceError(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lidar_types::{HeadingSource, Obb, SensorId, SpeedHistory, TrackId};

    fn sample_track(misses: u32) -> Track {
        Track {
            track_id: TrackId::new_random(),
            sensor_id: SensorId("s1".into()),
            state: TrackState::Confirmed,
            hits: 10,
            misses,
            obs_count: 10,
            first_ns: TimestampNs(0),
            last_ns: TimestampNs(1_000_000_000),
            kalman_state: [5.0, -20.0, 0.0, 8.0],
            covariance: [[0.0; 4]; 4],
            obb_smoothed: Obb {
                cx: 5.0,
                cy: -20.0,
                cz: 0.9,
                length: 0.4,
                width: 0.4,
                height: 1.7,
                heading_rad: std::f64::consts::FRAC_PI_2,
            },
            heading_smoothed: std::f64::consts::FRAC_PI_2,
            heading_source: HeadingSource::Velocity,
            class_label: "unknown".into(),
            class_confidence: 0.0,
            speed_history: SpeedHistory::new(32),
            misalignment_count: 0,
        }
    }

    #[test]
    fn confirmed_track_writes_a_row_and_an_observation() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("tracks.sqlite3");
        let (persistence, _join) = SqlitePersistence::open(&db_path).unwrap();

        persistence.record_tracks(&[sample_track(0)], TimestampNs(1_000_000_000));
        drop(persistence);

        let conn = rusqlite::Connection::open(&db_path).unwrap();
        // Give the writer thread's channel-close shutdown a moment; the
        // transaction above happens synchronously off `record_tracks`, but
        // the thread itself may still be mid-loop when we reconnect here in
        // a real process. In this single-threaded test the send is
        // immediately visible once the writer commits, so poll briefly.
        let mut track_count: i64 = 0;
        let mut obs_count: i64 = 0;
        for _ in 0..50 {
            track_count = conn
                .query_row("SELECT COUNT(*) FROM lidar_tracks", [], |r| r.get(0))
                .unwrap();
            obs_count = conn
                .query_row("SELECT COUNT(*) FROM lidar_track_obs", [], |r| r.get(0))
                .unwrap();
            if track_count == 1 && obs_count == 1 {
                break;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        assert_eq!(track_count, 1);
        assert_eq!(obs_count, 1);
    }

    #[test]
    fn coasted_track_writes_no_observation() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("tracks.sqlite3");
        let (persistence, _join) = SqlitePersistence::open(&db_path).unwrap();

        persistence.record_tracks(&[sample_track(2)], TimestampNs(1_000_000_000));
        drop(persistence);

        let conn = rusqlite::Connection::open(&db_path).unwrap();
        let mut track_count: i64 = 0;
        let mut obs_count: i64 = -1;
        for _ in 0..50 {
            track_count = conn
                .query_row("SELECT COUNT(*) FROM lidar_tracks", [], |r| r.get(0))
                .unwrap();
            obs_count = conn
                .query_row("SELECT COUNT(*) FROM lidar_track_obs", [], |r| r.get(0))
                .unwrap();
            if track_count == 1 {
                break;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        assert_eq!(track_count, 1);
        assert_eq!(obs_count, 0);
    }

    #[test]
    fn history_reader_finds_the_written_observation() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("tracks.sqlite3");
        let (persistence, _join) = SqlitePersistence::open(&db_path).unwrap();

        persistence.record_tracks(&[sample_track(0)], TimestampNs(1_000_000_000));
        drop(persistence);

        let reader = {
            let mut reader = None;
            for _ in 0..50 {
                let candidate = HistoryReader::open(&db_path).unwrap();
                if !candidate
                    .query_track_history("s1", 0, 2_000_000_000)
                    .unwrap()
                    .is_empty()
                {
                    reader = Some(candidate);
                    break;
                }
                std::thread::sleep(Duration::from_millis(20));
            }
            reader.expect("observation never appeared")
        };

        let rows = reader.query_track_history("s1", 0, 2_000_000_000).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].t_ns, 1_000_000_000);
    }
}
