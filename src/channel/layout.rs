//! Byte layout of the shared segment. All fields are little-endian.
//!
//! ```text
//! 0     u64   sequence counter (odd: observation pending, even: action ready)
//! 8     u32   flags (bit 0: simulator finished)
//! 16    u32   history length
//! 20    f32 x MAX_HISTORY_LENGTH   history
//! ...   f32   reward
//!       f64   simulation time
//!       f64   current throughput
//!       u32   station count
//!       u32   action kind (0 discrete, 1 continuous)
//!       u32   action value (u32 or f32 bits)
//! ```

use std::fs::File;
use std::io;
use std::os::unix::fs::FileExt;

use crate::ai::{Action, Observation, MAX_HISTORY_LENGTH};

pub const SEQ_OFFSET: u64 = 0;
pub const FLAGS_OFFSET: u64 = 8;
pub const FLAG_FINISHED: u32 = 1;

const OBS_OFFSET: u64 = 16;
const HISTORY_OFFSET: u64 = OBS_OFFSET + 4;
const REWARD_OFFSET: u64 = HISTORY_OFFSET + 4 * MAX_HISTORY_LENGTH as u64;
const SIM_TIME_OFFSET: u64 = REWARD_OFFSET + 4;
const THR_OFFSET: u64 = SIM_TIME_OFFSET + 8;
const N_WIFI_OFFSET: u64 = THR_OFFSET + 8;
const ACTION_OFFSET: u64 = N_WIFI_OFFSET + 4;

/// Bytes the layout occupies; the segment must be at least this large.
pub const LAYOUT_SIZE: u64 = ACTION_OFFSET + 8;

const ACTION_DISCRETE: u32 = 0;
const ACTION_CONTINUOUS: u32 = 1;

pub fn read_u64(file: &File, offset: u64) -> io::Result<u64> {
    let mut buf = [0u8; 8];
    file.read_exact_at(&mut buf, offset)?;
    Ok(u64::from_le_bytes(buf))
}

pub fn write_u64(file: &File, offset: u64, value: u64) -> io::Result<()> {
    file.write_all_at(&value.to_le_bytes(), offset)
}

pub fn read_u32(file: &File, offset: u64) -> io::Result<u32> {
    let mut buf = [0u8; 4];
    file.read_exact_at(&mut buf, offset)?;
    Ok(u32::from_le_bytes(buf))
}

pub fn write_u32(file: &File, offset: u64, value: u32) -> io::Result<()> {
    file.write_all_at(&value.to_le_bytes(), offset)
}

/// Write an observation block. Histories longer than the segment allows are
/// truncated to their newest `MAX_HISTORY_LENGTH` samples.
pub fn write_observation(file: &File, obs: &Observation) -> io::Result<()> {
    let skip = obs.history.len().saturating_sub(MAX_HISTORY_LENGTH);
    let history = &obs.history[skip..];

    let mut block = Vec::with_capacity((ACTION_OFFSET - OBS_OFFSET) as usize);
    block.extend_from_slice(&(history.len() as u32).to_le_bytes());
    for i in 0..MAX_HISTORY_LENGTH {
        let v = history.get(i).copied().unwrap_or(0.0);
        block.extend_from_slice(&v.to_le_bytes());
    }
    block.extend_from_slice(&obs.reward.to_le_bytes());
    block.extend_from_slice(&obs.sim_time.to_le_bytes());
    block.extend_from_slice(&obs.current_thr.to_le_bytes());
    block.extend_from_slice(&obs.n_wifi.to_le_bytes());
    file.write_all_at(&block, OBS_OFFSET)
}

pub fn read_observation(file: &File) -> io::Result<Observation> {
    let mut block = vec![0u8; (ACTION_OFFSET - OBS_OFFSET) as usize];
    file.read_exact_at(&mut block, OBS_OFFSET)?;

    let at = |offset: u64| (offset - OBS_OFFSET) as usize;
    let u32_at = |offset: u64| {
        let i = at(offset);
        u32::from_le_bytes([block[i], block[i + 1], block[i + 2], block[i + 3]])
    };
    let f64_at = |offset: u64| {
        let i = at(offset);
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&block[i..i + 8]);
        f64::from_le_bytes(raw)
    };

    let len = u32_at(OBS_OFFSET) as usize;
    if len > MAX_HISTORY_LENGTH {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("history length {len} exceeds {MAX_HISTORY_LENGTH}"),
        ));
    }
    let history: Vec<f32> = (0..len)
        .map(|i| f32::from_bits(u32_at(HISTORY_OFFSET + 4 * i as u64)))
        .collect();

    let observation = Observation {
        history,
        reward: f32::from_bits(u32_at(REWARD_OFFSET)),
        sim_time: f64_at(SIM_TIME_OFFSET),
        current_thr: f64_at(THR_OFFSET),
        n_wifi: u32_at(N_WIFI_OFFSET),
    };
    // A NaN reaching the learner poisons every weight it touches.
    if !observation.reward.is_finite()
        || !observation.sim_time.is_finite()
        || !observation.current_thr.is_finite()
        || observation.history.iter().any(|x| !x.is_finite())
    {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "observation carries a non-finite value",
        ));
    }
    Ok(observation)
}

pub fn write_action(file: &File, action: Action) -> io::Result<()> {
    let (kind, bits) = match action {
        Action::Discrete(a) => (ACTION_DISCRETE, a),
        Action::Continuous(a) => (ACTION_CONTINUOUS, a.to_bits()),
    };
    let mut buf = [0u8; 8];
    buf[..4].copy_from_slice(&kind.to_le_bytes());
    buf[4..].copy_from_slice(&bits.to_le_bytes());
    file.write_all_at(&buf, ACTION_OFFSET)
}

pub fn read_action(file: &File) -> io::Result<Action> {
    let kind = read_u32(file, ACTION_OFFSET)?;
    let bits = read_u32(file, ACTION_OFFSET + 4)?;
    match kind {
        ACTION_DISCRETE => Ok(Action::Discrete(bits)),
        ACTION_CONTINUOUS => Ok(Action::Continuous(f32::from_bits(bits))),
        other => Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("unknown action kind {other}"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment() -> File {
        let file = tempfile::tempfile().unwrap();
        file.set_len(LAYOUT_SIZE).unwrap();
        file
    }

    #[test]
    fn test_layout_fits_default_segment() {
        assert!(LAYOUT_SIZE <= 16_384);
    }

    #[test]
    fn test_observation_through_segment() {
        let file = segment();
        let obs = Observation {
            history: vec![0.1, 0.2, 0.3],
            reward: 0.75,
            sim_time: 12.5,
            current_thr: 38.25,
            n_wifi: 15,
        };
        write_observation(&file, &obs).unwrap();
        assert_eq!(read_observation(&file).unwrap(), obs);
    }

    #[test]
    fn test_overlong_history_keeps_newest() {
        let file = segment();
        let history: Vec<f32> = (0..MAX_HISTORY_LENGTH + 10).map(|i| i as f32).collect();
        let obs = Observation {
            history,
            reward: 0.0,
            sim_time: 0.0,
            current_thr: 0.0,
            n_wifi: 1,
        };
        write_observation(&file, &obs).unwrap();
        let read = read_observation(&file).unwrap();
        assert_eq!(read.history.len(), MAX_HISTORY_LENGTH);
        assert_eq!(read.history[0], 10.0);
    }

    #[test]
    fn test_non_finite_observation_rejected() {
        let file = segment();
        let mut obs = Observation {
            history: vec![0.5; 4],
            reward: f32::NAN,
            sim_time: 1.0,
            current_thr: 10.0,
            n_wifi: 5,
        };
        write_observation(&file, &obs).unwrap();
        let err = read_observation(&file).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);

        obs.reward = 0.5;
        obs.history[2] = f32::INFINITY;
        write_observation(&file, &obs).unwrap();
        assert!(read_observation(&file).is_err());
    }

    #[test]
    fn test_actions_through_segment() {
        let file = segment();
        write_action(&file, Action::Discrete(4)).unwrap();
        assert_eq!(read_action(&file).unwrap(), Action::Discrete(4));
        write_action(&file, Action::Continuous(2.5)).unwrap();
        assert_eq!(read_action(&file).unwrap(), Action::Continuous(2.5));
    }

    #[test]
    fn test_counter_fields() {
        let file = segment();
        write_u64(&file, SEQ_OFFSET, 7).unwrap();
        write_u32(&file, FLAGS_OFFSET, FLAG_FINISHED).unwrap();
        assert_eq!(read_u64(&file, SEQ_OFFSET).unwrap(), 7);
        assert_eq!(read_u32(&file, FLAGS_OFFSET).unwrap(), FLAG_FINISHED);
    }
}
