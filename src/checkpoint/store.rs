use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use lz4_flex::frame::{FrameDecoder, FrameEncoder, FrameInfo};

use crate::ai::AgentState;
use crate::checkpoint::metadata::{CheckpointMetadata, FORMAT_VERSION};
use crate::error::CheckpointError;

/// File extension of every checkpoint.
pub const CHECKPOINT_EXTENSION: &str = "ckpt.lz4";

const MAGIC: &[u8; 8] = b"RLCKPT\x00\x01";

/// Configuration for the checkpoint store.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct CheckpointStoreConfig {
    pub checkpoint_dir: PathBuf,
}

impl Default for CheckpointStoreConfig {
    fn default() -> Self {
        CheckpointStoreConfig {
            checkpoint_dir: PathBuf::from("checkpoints"),
        }
    }
}

/// A persisted agent snapshot and the header describing it.
#[derive(Debug, Clone, PartialEq)]
pub struct Checkpoint {
    pub metadata: CheckpointMetadata,
    pub state: AgentState,
}

/// Checkpoint file name for one run of a campaign:
/// `{agent}_{scenario}_{n_wifi}_run_{index}.ckpt.lz4`.
pub fn checkpoint_file_name(agent: &str, scenario: &str, n_wifi: u32, run_index: u32) -> String {
    format!("{agent}_{scenario}_{n_wifi}_run_{run_index}.{CHECKPOINT_EXTENSION}")
}

/// Saves, loads and lists checkpoints. Paths are computed, never looked up.
pub struct CheckpointStore {
    config: CheckpointStoreConfig,
}

impl CheckpointStore {
    /// Creating a store touches nothing on disk; the directory is created on
    /// first save.
    pub fn new(config: CheckpointStoreConfig) -> Self {
        CheckpointStore { config }
    }

    pub fn dir(&self) -> &Path {
        &self.config.checkpoint_dir
    }

    pub fn path_for(&self, agent: &str, scenario: &str, n_wifi: u32, run_index: u32) -> PathBuf {
        self.config
            .checkpoint_dir
            .join(checkpoint_file_name(agent, scenario, n_wifi, run_index))
    }

    /// Compress and write a checkpoint to `path`.
    ///
    /// The blob is written to a temporary file in the same directory, synced,
    /// then renamed over `path`, so readers see either the old file, the new
    /// file, or nothing.
    pub fn save(&self, path: &Path, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        let write_err = |source: io::Error| CheckpointError::Write {
            path: path.to_path_buf(),
            source,
        };

        let payload = encode(checkpoint).map_err(write_err)?;

        let parent = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        fs::create_dir_all(parent).map_err(write_err)?;

        let mut tmp = tempfile::Builder::new()
            .prefix(".ckpt-")
            .suffix(".tmp")
            .tempfile_in(parent)
            .map_err(write_err)?;
        {
            let info = FrameInfo::new().content_checksum(true);
            let mut encoder = FrameEncoder::with_frame_info(info, BufWriter::new(tmp.as_file_mut()));
            encoder.write_all(&payload).map_err(write_err)?;
            let mut writer = encoder
                .finish()
                .map_err(|e| write_err(io::Error::other(e)))?;
            writer.flush().map_err(write_err)?;
        }
        tmp.as_file().sync_all().map_err(write_err)?;
        tmp.persist(path).map_err(|e| write_err(e.error))?;
        Ok(())
    }

    /// Read and decompress a checkpoint from `path`.
    pub fn load(&self, path: &Path) -> Result<Checkpoint, CheckpointError> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(CheckpointError::NotFound(path.to_path_buf()))
            }
            Err(source) => {
                return Err(CheckpointError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        let corrupt = |reason: String| CheckpointError::Corrupt {
            path: path.to_path_buf(),
            reason,
        };

        let mut payload = Vec::new();
        FrameDecoder::new(BufReader::new(file))
            .read_to_end(&mut payload)
            .map_err(|e| corrupt(format!("lz4 frame: {e}")))?;
        decode(&payload).map_err(corrupt)
    }

    /// Run indices with a checkpoint on disk for this configuration, ascending.
    pub fn list_runs(
        &self,
        agent: &str,
        scenario: &str,
        n_wifi: u32,
    ) -> Result<Vec<(u32, PathBuf)>, CheckpointError> {
        let dir = &self.config.checkpoint_dir;
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let prefix = format!("{agent}_{scenario}_{n_wifi}_run_");
        let suffix = format!(".{CHECKPOINT_EXTENSION}");

        let list_err = |source| CheckpointError::List {
            dir: dir.clone(),
            source,
        };
        let mut runs = Vec::new();
        for entry in fs::read_dir(dir).map_err(list_err)? {
            let entry = entry.map_err(list_err)?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            let index = name
                .strip_prefix(&prefix)
                .and_then(|rest| rest.strip_suffix(&suffix))
                .and_then(|idx| idx.parse::<u32>().ok());
            if let Some(index) = index {
                runs.push((index, entry.path()));
            }
        }
        runs.sort_by_key(|(i, _)| *i);
        Ok(runs)
    }

    /// Highest `k` such that checkpoints for runs `1..=k` all exist.
    pub fn last_contiguous_run(
        &self,
        agent: &str,
        scenario: &str,
        n_wifi: u32,
    ) -> Result<Option<u32>, CheckpointError> {
        let mut last = None;
        for (expected, (index, _)) in (1u32..).zip(self.list_runs(agent, scenario, n_wifi)?) {
            if index != expected {
                break;
            }
            last = Some(index);
        }
        Ok(last)
    }
}

// Layout: MAGIC | u32 metadata length | metadata JSON | u64 state length | state.
fn encode(checkpoint: &Checkpoint) -> io::Result<Vec<u8>> {
    let meta = serde_json::to_vec(&checkpoint.metadata).map_err(io::Error::other)?;
    let state = &checkpoint.state.data;
    let mut buf = Vec::with_capacity(MAGIC.len() + 12 + meta.len() + state.len());
    buf.extend_from_slice(MAGIC);
    buf.extend_from_slice(&metadata_len(meta.len())?.to_le_bytes());
    buf.extend_from_slice(&meta);
    buf.extend_from_slice(&(state.len() as u64).to_le_bytes());
    buf.extend_from_slice(state);
    Ok(buf)
}

fn metadata_len(len: usize) -> io::Result<u32> {
    u32::try_from(len).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("metadata of {len} bytes exceeds the length field"),
        )
    })
}

fn decode(payload: &[u8]) -> Result<Checkpoint, String> {
    let rest = payload
        .strip_prefix(MAGIC.as_slice())
        .ok_or_else(|| "bad magic".to_string())?;

    let (meta_len, rest) = split_len::<4>(rest)?;
    if rest.len() < meta_len {
        return Err("truncated metadata".into());
    }
    let (meta, rest) = rest.split_at(meta_len);
    let metadata: CheckpointMetadata =
        serde_json::from_slice(meta).map_err(|e| format!("metadata: {e}"))?;
    if metadata.format_version != FORMAT_VERSION {
        return Err(format!(
            "unsupported format version {}",
            metadata.format_version
        ));
    }

    let (state_len, rest) = split_len::<8>(rest)?;
    if rest.len() != state_len {
        return Err(format!(
            "state length mismatch: header says {state_len}, found {}",
            rest.len()
        ));
    }

    Ok(Checkpoint {
        metadata,
        state: AgentState {
            data: rest.to_vec(),
        },
    })
}

fn split_len<const N: usize>(bytes: &[u8]) -> Result<(usize, &[u8]), String> {
    if bytes.len() < N {
        return Err("truncated length field".into());
    }
    let (head, rest) = bytes.split_at(N);
    let mut raw = [0u8; 8];
    raw[..N].copy_from_slice(head);
    let len = usize::try_from(u64::from_le_bytes(raw)).map_err(|_| "length overflow".to_string())?;
    Ok((len, rest))
}
