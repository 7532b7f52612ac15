use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::ai::{Action, Observation};
use crate::channel::layout::{
    read_action, read_u64, write_observation, write_u32, write_u64, FLAGS_OFFSET, FLAG_FINISHED,
    SEQ_OFFSET,
};

/// Simulator side of the segment protocol.
///
/// Publishes an observation (making the sequence counter odd) and blocks until
/// the orchestrator has written an action (making it even again).
pub struct SimulatorEndpoint {
    file: File,
    seq: u64,
    poll_interval: Duration,
    stop: Arc<AtomicBool>,
}

impl SimulatorEndpoint {
    /// Attach to an already-bound segment. Setting `stop` aborts a pending
    /// `exchange` with `ErrorKind::Interrupted`.
    pub fn attach(path: &Path, poll_interval: Duration, stop: Arc<AtomicBool>) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let seq = read_u64(&file, SEQ_OFFSET)?;
        if seq % 2 == 1 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "segment has an unanswered observation pending",
            ));
        }
        Ok(SimulatorEndpoint {
            file,
            seq,
            poll_interval,
            stop,
        })
    }

    /// Publish `obs` and wait up to `timeout` for the agent's action.
    pub fn exchange(&mut self, obs: &Observation, timeout: Duration) -> io::Result<Action> {
        write_observation(&self.file, obs)?;
        let published = self.seq + 1;
        write_u64(&self.file, SEQ_OFFSET, published)?;

        let deadline = Instant::now() + timeout;
        loop {
            let seq = read_u64(&self.file, SEQ_OFFSET)?;
            if seq == published + 1 {
                self.seq = seq;
                return read_action(&self.file);
            }
            if seq < published {
                return Err(io::Error::new(
                    io::ErrorKind::ConnectionReset,
                    "segment was reset by the orchestrator",
                ));
            }
            if self.stop.load(Ordering::Relaxed) {
                return Err(io::Error::new(io::ErrorKind::Interrupted, "stopped"));
            }
            if Instant::now() >= deadline {
                return Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "no action received from the orchestrator",
                ));
            }
            thread::sleep(self.poll_interval);
        }
    }

    /// Signal that the simulation is over.
    pub fn finish(&self) -> io::Result<()> {
        write_u32(&self.file, FLAGS_OFFSET, FLAG_FINISHED)
    }

    /// Steps answered so far.
    pub fn steps(&self) -> u64 {
        self.seq / 2
    }
}
