//! Standalone (key, value) sample spooler.
//!
//! Administrator-controlled, independent of the trainer: when started it
//! appends every record handed to it to a rotating file under
//! `spool_dir`, little-endian `[u32 key_len][u32 value_len][key][value]`,
//! until it hits `spool_max_bytes` or its configured time window elapses,
//! then stops itself. Never read by the trainer.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{info, warn};

use crate::error::{Error, Result};

enum Msg {
    Record { key: Vec<u8>, value: Vec<u8> },
    Stop,
}

/// Idempotent start/stop responses, distinguishable from a freshly taken
/// action on the admin surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpoolStatus {
    Started,
    AlreadyRunning,
    Stopped,
    NotRunning,
    Running,
}

struct Inner {
    tx: Sender<Msg>,
    handle: JoinHandle<()>,
}

/// Standalone sample spooler. One instance is shared across callers; start
/// and stop are both idempotent.
pub struct Spooler {
    dir: PathBuf,
    max_bytes: u64,
    window: Duration,
    inner: Mutex<Option<Inner>>,
    running: Arc<AtomicBool>,
}

impl Spooler {
    pub fn new(dir: PathBuf, max_bytes: u64, window: Duration) -> Spooler {
        Spooler {
            dir,
            max_bytes,
            window,
            inner: Mutex::new(None),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn status(&self) -> SpoolStatus {
        if self.running.load(Ordering::Acquire) {
            SpoolStatus::Running
        } else {
            SpoolStatus::NotRunning
        }
    }

    /// Start the spooler if it is not already running. Idempotent: calling
    /// this while already running returns `AlreadyRunning` rather than
    /// spawning a second writer.
    pub fn start(&self) -> Result<SpoolStatus> {
        let mut guard = self.inner.lock().unwrap();
        if self.running.load(Ordering::Acquire) {
            return Ok(SpoolStatus::AlreadyRunning);
        }
        // A previous writer may have stopped itself (max_bytes/window) and
        // left its handle here for us to reap before starting a new one.
        if let Some(stale) = guard.take() {
            let _ = stale.handle.join();
        }

        std::fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(format!(
            "mcz_samples_{}.bin",
            Utc::now().format("%Y%m%d_%H%M%S")
        ));
        let file = File::create(&path)?;
        let writer = BufWriter::new(file);

        let (tx, rx) = mpsc::channel::<Msg>();
        self.running.store(true, Ordering::Release);
        let running = Arc::clone(&self.running);
        let max_bytes = self.max_bytes;
        let window = self.window;

        let handle = thread::Builder::new()
            .name("dictcomp-spooler".into())
            .spawn(move || run_writer(writer, rx, max_bytes, window, running))
            .expect("failed to spawn spooler thread");

        *guard = Some(Inner { tx, handle });
        info!(path = %path.display(), "spool writer started");
        Ok(SpoolStatus::Started)
    }

    /// Stop the spooler if it is running. Idempotent: calling this while
    /// already stopped returns `NotRunning`.
    pub fn stop(&self) -> SpoolStatus {
        let mut guard = self.inner.lock().unwrap();
        if !self.running.load(Ordering::Acquire) {
            // Writer may have already stopped itself (max_bytes/window);
            // just reap its handle and report the idempotent status.
            if let Some(stale) = guard.take() {
                let _ = stale.handle.join();
            }
            return SpoolStatus::NotRunning;
        }
        match guard.take() {
            Some(inner) => {
                let _ = inner.tx.send(Msg::Stop);
                let _ = inner.handle.join();
                self.running.store(false, Ordering::Release);
                SpoolStatus::Stopped
            }
            None => SpoolStatus::NotRunning,
        }
    }

    /// Hand one (key, value) record to the writer. Non-blocking: if the
    /// spooler is not running this is a no-op success (nothing to spool
    /// to), and a disconnected channel (writer stopped itself) is reported
    /// as `NotFound` so the caller can notice and stop calling.
    pub fn record(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let guard = self.inner.lock().unwrap();
        match guard.as_ref() {
            None => Ok(()),
            Some(inner) => inner
                .tx
                .send(Msg::Record {
                    key: key.to_vec(),
                    value: value.to_vec(),
                })
                .map_err(|_| Error::NotFound("spool writer is no longer running".into())),
        }
    }
}

impl Drop for Spooler {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_writer(
    mut writer: BufWriter<File>,
    rx: Receiver<Msg>,
    max_bytes: u64,
    window: Duration,
    running: Arc<AtomicBool>,
) {
    let started = Instant::now();
    let mut written: u64 = 0;

    loop {
        if max_bytes > 0 && written >= max_bytes {
            info!(written, "spool writer reached spool_max_bytes");
            break;
        }
        if !window.is_zero() && started.elapsed() >= window {
            info!("spool writer reached its time window");
            break;
        }

        match rx.recv_timeout(Duration::from_millis(200)) {
            Ok(Msg::Stop) => break,
            Ok(Msg::Record { key, value }) => {
                match write_record(&mut writer, &key, &value) {
                    Ok(n) => written += n as u64,
                    Err(err) => {
                        warn!(%err, "spool write failed");
                        break;
                    }
                }
            }
            Err(TryRecvError::Timeout) => continue,
            Err(TryRecvError::Disconnected) => break,
        }
    }

    let _ = writer.flush();
    running.store(false, Ordering::Release);
}

fn write_record(writer: &mut BufWriter<File>, key: &[u8], value: &[u8]) -> Result<usize> {
    writer.write_all(&(key.len() as u32).to_le_bytes())?;
    writer.write_all(&(value.len() as u32).to_le_bytes())?;
    writer.write_all(key)?;
    writer.write_all(value)?;
    Ok(8 + key.len() + value.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let spooler = Spooler::new(dir.path().to_path_buf(), 0, Duration::from_secs(0));
        assert_eq!(spooler.start().unwrap(), SpoolStatus::Started);
        assert_eq!(spooler.start().unwrap(), SpoolStatus::AlreadyRunning);
        assert_eq!(spooler.stop(), SpoolStatus::Stopped);
    }

    #[test]
    fn stop_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let spooler = Spooler::new(dir.path().to_path_buf(), 0, Duration::from_secs(0));
        assert_eq!(spooler.stop(), SpoolStatus::NotRunning);
    }

    #[test]
    fn record_before_start_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        let spooler = Spooler::new(dir.path().to_path_buf(), 0, Duration::from_secs(0));
        assert!(spooler.record(b"k", b"v").is_ok());
    }

    #[test]
    fn spooled_records_land_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let spooler = Spooler::new(dir.path().to_path_buf(), 0, Duration::from_secs(0));
        spooler.start().unwrap();
        spooler.record(b"key1", b"value1").unwrap();
        spooler.record(b"key2", b"value2").unwrap();
        spooler.stop();

        let mut entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
        let path = entries.remove(0).unwrap().path();
        let data = std::fs::read(&path).unwrap();
        assert!(!data.is_empty());

        let key1_len = u32::from_le_bytes(data[0..4].try_into().unwrap());
        assert_eq!(key1_len, 4);
    }

    #[test]
    fn stops_itself_once_max_bytes_reached() {
        let dir = tempfile::tempdir().unwrap();
        let spooler = Spooler::new(dir.path().to_path_buf(), 16, Duration::from_secs(0));
        spooler.start().unwrap();
        for _ in 0..50 {
            let _ = spooler.record(b"k", b"v");
            std::thread::sleep(Duration::from_millis(5));
            if spooler.status() == SpoolStatus::NotRunning {
                break;
            }
        }
        assert_eq!(spooler.status(), SpoolStatus::NotRunning);
    }
}
