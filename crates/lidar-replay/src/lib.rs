//! §6 log format: a directory of `header.json` + `index.bin` + chunked,
//! length-prefixed frame files, zipped on finalize exactly the way
//! `braidz-writer` turns a Braid output directory into a `.braidz` file
//! (`zip_dir`'s directory-then-zip walk, generalized here from "a directory
//! of CSVs" to "a directory of chunked binary frame logs").

mod zip_dir;

use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};

use lidar_types::{Error, FrameBundle, Result, SensorId, TimestampNs};

const FRAMES_PER_CHUNK: u64 = 1000;
const HEADER_FNAME: &str = "header.json";
const INDEX_FNAME: &str = "index.bin";
const FRAMES_DIRNAME: &str = "frames";
/// Bytes of one fixed-width `index.bin` row: `frame_id u64, t_ns i64, chunk_id u32, offset u32`.
const INDEX_ROW_LEN: usize = 8 + 8 + 4 + 4;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VrlogHeader {
    pub sensor_id: SensorId,
    pub start_ns: TimestampNs,
    pub end_ns: TimestampNs,
    pub frame_count: u64,
    pub coordinate_frame: String,
}

#[derive(Debug, Clone, Copy)]
struct IndexRow {
    frame_id: u64,
    t_ns: i64,
    chunk_id: u32,
    offset: u32,
}

impl IndexRow {
    fn write_to(&self, w: &mut impl Write) -> std::io::Result<()> {
        w.write_u64::<LittleEndian>(self.frame_id)?;
        w.write_i64::<LittleEndian>(self.t_ns)?;
        w.write_u32::<LittleEndian>(self.chunk_id)?;
        w.write_u32::<LittleEndian>(self.offset)
    }

    fn read_from(r: &mut impl Read) -> std::io::Result<Self> {
        Ok(Self {
            frame_id: r.read_u64::<LittleEndian>()?,
            t_ns: r.read_i64::<LittleEndian>()?,
            chunk_id: r.read_u32::<LittleEndian>()?,
            offset: r.read_u32::<LittleEndian>()?,
        })
    }
}

fn chunk_file_name(chunk_id: u32) -> String {
    format!("chunk_{chunk_id:04}.pb")
}

/// Builds one `.vrlog` container in a scratch directory, then zips it.
/// `write_frame` must be called with strictly ascending `frame_id` (C12's
/// own publish order already guarantees this).
pub struct VrlogWriter {
    scratch_dir: PathBuf,
    sensor_id: SensorId,
    coordinate_frame: String,
    current_chunk_id: u32,
    current_chunk_file: File,
    current_chunk_offset: u32,
    frames_in_current_chunk: u64,
    index_rows: Vec<IndexRow>,
    start_ns: Option<TimestampNs>,
    end_ns: Option<TimestampNs>,
}

impl VrlogWriter {
    pub fn create(scratch_dir: PathBuf, sensor_id: SensorId, coordinate_frame: String) -> Result<Self> {
        std::fs::create_dir_all(scratch_dir.join(FRAMES_DIRNAME))?;
        let current_chunk_file = File::create(scratch_dir.join(FRAMES_DIRNAME).join(chunk_file_name(0)))?;
        Ok(Self {
            scratch_dir,
            sensor_id,
            coordinate_frame,
            current_chunk_id: 0,
            current_chunk_file,
            current_chunk_offset: 0,
            frames_in_current_chunk: 0,
            index_rows: Vec::new(),
            start_ns: None,
            end_ns: None,
        })
    }

    pub fn write_frame(&mut self, bundle: &FrameBundle) -> Result<()> {
        if self.frames_in_current_chunk >= FRAMES_PER_CHUNK {
            self.current_chunk_id += 1;
            self.current_chunk_file = File::create(
                self.scratch_dir
                    .join(FRAMES_DIRNAME)
                    .join(chunk_file_name(self.current_chunk_id)),
            )?;
            self.current_chunk_offset = 0;
            self.frames_in_current_chunk = 0;
        }

        let payload = serde_json::to_vec(bundle)?;
        let len: u32 = payload
            .len()
            .try_into()
            .map_err(|_| Error::ReplayFormatError("frame payload exceeds u32::MAX bytes".into()))?;

        self.current_chunk_file.write_u32::<LittleEndian>(len)?;
        self.current_chunk_file.write_all(&payload)?;

        self.index_rows.push(IndexRow {
            frame_id: bundle.frame_id.0,
            t_ns: bundle.t_ns.0,
            chunk_id: self.current_chunk_id,
            offset: self.current_chunk_offset,
        });

        self.current_chunk_offset += 4 + len;
        self.frames_in_current_chunk += 1;
        self.start_ns.get_or_insert(bundle.t_ns);
        self.end_ns = Some(bundle.t_ns);

        Ok(())
    }

    /// Writes `header.json` and `index.bin`, zips the scratch directory into
    /// `output_vrlog_path`, and removes the scratch directory. Returns the
    /// number of frames written.
    pub fn finalize(mut self, output_vrlog_path: &Path) -> Result<u64> {
        self.current_chunk_file.flush()?;

        let header = VrlogHeader {
            sensor_id: self.sensor_id.clone(),
            start_ns: self.start_ns.unwrap_or(TimestampNs(0)),
            end_ns: self.end_ns.unwrap_or(TimestampNs(0)),
            frame_count: self.index_rows.len() as u64,
            coordinate_frame: self.coordinate_frame.clone(),
        };
        let header_json = serde_json::to_vec_pretty(&header)?;
        std::fs::write(self.scratch_dir.join(HEADER_FNAME), header_json)?;

        let mut index_buf = Vec::with_capacity(self.index_rows.len() * INDEX_ROW_LEN);
        for row in &self.index_rows {
            row.write_to(&mut index_buf)?;
        }
        std::fs::write(self.scratch_dir.join(INDEX_FNAME), &index_buf)?;

        let frame_count = self.index_rows.len() as u64;
        zip_dir::zip_directory(&self.scratch_dir, output_vrlog_path)?;
        std::fs::remove_dir_all(&self.scratch_dir)?;

        Ok(frame_count)
    }
}

/// Reads a finalized `.vrlog` zip archive for replay.
pub struct VrlogReader {
    header: VrlogHeader,
    index_rows: Vec<IndexRow>,
    archive_path: PathBuf,
}

impl VrlogReader {
    pub fn open(vrlog_path: &Path) -> Result<Self> {
        let file = File::open(vrlog_path)?;
        let mut archive = zip::ZipArchive::new(file)
            .map_err(|e| Error::ReplayFormatError(format!("not a valid .vrlog archive: {e}")))?;

        let header: VrlogHeader = {
            let mut entry = archive
                .by_name(HEADER_FNAME)
                .map_err(|e| Error::ReplayFormatError(format!("missing {HEADER_FNAME}: {e}")))?;
            let mut buf = Vec::new();
            entry.read_to_end(&mut buf)?;
            serde_json::from_slice(&buf)?
        };

        let index_rows = {
            let mut entry = archive
                .by_name(INDEX_FNAME)
                .map_err(|e| Error::ReplayFormatError(format!("missing {INDEX_FNAME}: {e}")))?;
            let mut buf = Vec::new();
            entry.read_to_end(&mut buf)?;
            if buf.len() % INDEX_ROW_LEN != 0 {
                return Err(Error::ReplayFormatError(
                    "index.bin length is not a multiple of the row width".into(),
                ));
            }
            let mut cursor = std::io::Cursor::new(buf);
            let mut rows = Vec::with_capacity(header.frame_count as usize);
            while (cursor.position() as usize) < cursor.get_ref().len() {
                rows.push(IndexRow::read_from(&mut cursor)?);
            }
            rows
        };

        Ok(Self {
            header,
            index_rows,
            archive_path: vrlog_path.to_path_buf(),
        })
    }

    pub fn header(&self) -> &VrlogHeader {
        &self.header
    }

    pub fn frame_count(&self) -> u64 {
        self.index_rows.len() as u64
    }

    /// Replays every recorded frame, strictly in the order written
    /// (ascending `frame_id`, per the pipeline's own publish order), as an
    /// iterator so a caller can pace playback against `t_ns` without
    /// buffering the whole log in memory.
    pub fn frames(&self) -> Result<Vec<FrameBundle>> {
        let file = File::open(&self.archive_path)?;
        let mut archive = zip::ZipArchive::new(file)
            .map_err(|e| Error::ReplayFormatError(format!("not a valid .vrlog archive: {e}")))?;

        let mut chunk_cache: Option<(u32, Vec<u8>)> = None;
        let mut out = Vec::with_capacity(self.index_rows.len());

        for row in &self.index_rows {
            if chunk_cache.as_ref().map(|(id, _)| *id) != Some(row.chunk_id) {
                let name = format!("{FRAMES_DIRNAME}/{}", chunk_file_name(row.chunk_id));
                let mut entry = archive.by_name(&name).map_err(|e| {
                    Error::ReplayFormatError(format!("missing chunk {name}: {e}"))
                })?;
                let mut buf = Vec::new();
                entry.read_to_end(&mut buf)?;
                chunk_cache = Some((row.chunk_id, buf));
            }
            let (_, buf) = chunk_cache.as_ref().unwrap();

            let offset = row.offset as usize;
            if offset + 4 > buf.len() {
                return Err(Error::ReplayFormatError(format!(
                    "index row for frame {} points past end of chunk {}",
                    row.frame_id, row.chunk_id
                )));
            }
            let len = u32::from_le_bytes(buf[offset..offset + 4].try_into().unwrap()) as usize;
            let payload_start = offset + 4;
            let payload_end = payload_start + len;
            if payload_end > buf.len() {
                return Err(Error::ReplayFormatError(format!(
                    "frame {} payload truncated in chunk {}",
                    row.frame_id, row.chunk_id
                )));
            }
            let bundle: FrameBundle = serde_json::from_slice(&buf[payload_start..payload_end])?;
            out.push(bundle);
        }

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lidar_types::FrameId;

    fn bundle(frame_id: u64, t_ns: i64) -> FrameBundle {
        FrameBundle {
            frame_id: FrameId(frame_id),
            t_ns: TimestampNs(t_ns),
            sensor_id: SensorId("s1".into()),
            frame_type: lidar_types::FrameType::Foreground,
            background_seq: 0,
            point_cloud: None,
            cluster_set: None,
            track_set: None,
            debug_overlay: None,
        }
    }

    #[test]
    fn round_trips_a_handful_of_frames() {
        let root = tempfile::tempdir().unwrap();
        let scratch = root.path().join("scratch");
        let vrlog_path = root.path().join("session.vrlog");

        let mut writer = VrlogWriter::create(scratch, SensorId("s1".into()), "world".into()).unwrap();
        for i in 0..5u64 {
            writer.write_frame(&bundle(i, i as i64 * 100_000_000)).unwrap();
        }
        let written = writer.finalize(&vrlog_path).unwrap();
        assert_eq!(written, 5);

        let reader = VrlogReader::open(&vrlog_path).unwrap();
        assert_eq!(reader.frame_count(), 5);
        assert_eq!(reader.header().sensor_id, SensorId("s1".into()));

        let frames = reader.frames().unwrap();
        assert_eq!(frames.len(), 5);
        for (i, f) in frames.iter().enumerate() {
            assert_eq!(f.frame_id.0, i as u64);
        }
    }

    #[test]
    fn splits_across_chunk_boundary() {
        let root = tempfile::tempdir().unwrap();
        let scratch = root.path().join("scratch");
        let vrlog_path = root.path().join("session.vrlog");

        let mut writer = VrlogWriter::create(scratch, SensorId("s1".into()), "world".into()).unwrap();
        let n = FRAMES_PER_CHUNK + 3;
        for i in 0..n {
            writer.write_frame(&bundle(i, i as i64)).unwrap();
        }
        writer.finalize(&vrlog_path).unwrap();

        let reader = VrlogReader::open(&vrlog_path).unwrap();
        let frames = reader.frames().unwrap();
        assert_eq!(frames.len() as u64, n);
        assert_eq!(frames.last().unwrap().frame_id.0, n - 1);
    }
}
