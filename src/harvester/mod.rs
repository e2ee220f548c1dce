// SPDX-License-Identifier: Apache-2.0

//! Harvester: one task per actively tailed file.
//!
//! Opens the file (bounded retries with backoff), seeks to the resume
//! position, then reads lines with a bounded wait. A timed-out wait checks
//! for truncation and for the dead-time cutoff. Whatever path the instance
//! exits through, it publishes its final offset on its [`HarvesterHandle`]
//! so the prospector can resume correctly and never double-harvests.

pub mod reader;

use chrono::Utc;
use std::fs::File;
use std::io::{Seek, SeekFrom};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::AsyncBufReadExt;
use tokio::select;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::bounded_channel::BoundedSender;
use crate::config::ShipperConfig;
use crate::event::Event;
use crate::identity::FileIdentity;
use crate::telemetry::PipelineMetrics;

use reader::{Line, LineReader, ReadOutcome};

/// Completion state of a harvester instance.
///
/// The finished flag is explicit; nothing is inferred from queue occupancy.
/// `finish` stores the offset before releasing the flag, so a reader that
/// observes `is_finished()` always sees the final offset.
#[derive(Debug)]
pub struct HarvesterHandle {
    finished: AtomicBool,
    offset: AtomicU64,
}

impl HarvesterHandle {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            finished: AtomicBool::new(false),
            offset: AtomicU64::new(0),
        })
    }

    /// A handle that is already finished at the given offset, for files
    /// tracked without a running harvester (dead on arrival).
    pub fn finished_at(offset: u64) -> Arc<Self> {
        let handle = Self::new();
        handle.finish(offset);
        handle
    }

    pub fn finish(&self, offset: u64) {
        self.offset.store(offset, Ordering::Relaxed);
        self.finished.store(true, Ordering::Release);
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    /// Final offset, available once the harvester finished.
    pub fn final_offset(&self) -> Option<u64> {
        if self.is_finished() {
            Some(self.offset.load(Ordering::Relaxed))
        } else {
            None
        }
    }
}

/// The subset of agent configuration a harvester needs.
#[derive(Debug, Clone)]
pub struct HarvesterConfig {
    pub read_timeout: Duration,
    pub backoff: Duration,
    pub dead_time: Duration,
    pub open_retry_limit: u32,
    pub tail_files: bool,
}

impl From<&ShipperConfig> for HarvesterConfig {
    fn from(config: &ShipperConfig) -> Self {
        Self {
            read_timeout: config.read_timeout,
            backoff: config.backoff,
            dead_time: config.dead_time,
            open_retry_limit: config.open_retry_limit,
            tail_files: config.tail_files,
        }
    }
}

enum Source {
    File { path: PathBuf, resume_offset: u64 },
    Stdin,
}

pub struct Harvester {
    source: Source,
    config: HarvesterConfig,
    events: BoundedSender<Event>,
    handle: Arc<HarvesterHandle>,
    metrics: PipelineMetrics,
}

impl Harvester {
    /// Harvester for a regular file, resuming at `resume_offset`.
    pub fn file(
        path: PathBuf,
        resume_offset: u64,
        config: HarvesterConfig,
        events: BoundedSender<Event>,
        handle: Arc<HarvesterHandle>,
        metrics: PipelineMetrics,
    ) -> Self {
        Self {
            source: Source::File {
                path,
                resume_offset,
            },
            config,
            events,
            handle,
            metrics,
        }
    }

    /// Harvester for standard input. Bypasses the filesystem entirely and
    /// emits events that the registrar never persists.
    pub fn stdin(
        config: HarvesterConfig,
        events: BoundedSender<Event>,
        handle: Arc<HarvesterHandle>,
        metrics: PipelineMetrics,
    ) -> Self {
        Self {
            source: Source::Stdin,
            config,
            events,
            handle,
            metrics,
        }
    }

    pub async fn run(self, cancel: CancellationToken) {
        self.metrics.harvesters_started.inc();
        let final_offset = match &self.source {
            Source::File {
                path,
                resume_offset,
            } => {
                let path = path.clone();
                self.run_file(path, *resume_offset, &cancel).await
            }
            Source::Stdin => self.run_stdin(&cancel).await,
        };
        self.handle.finish(final_offset);
        self.metrics.harvesters_closed.inc();
    }

    async fn run_file(&self, path: PathBuf, resume_offset: u64, cancel: &CancellationToken) -> u64 {
        let mut offset = resume_offset;

        let Some((mut file, identity)) = self.open_with_retry(&path, cancel).await else {
            return offset;
        };

        let len = match file.metadata() {
            Ok(md) => md.len(),
            Err(e) => {
                error!(path = %path.display(), error = %e, "Failed to stat opened file");
                return offset;
            }
        };

        // Seek: stored offset wins; a file already shorter than the stored
        // offset was truncated while untracked and restarts at 0.
        if offset > 0 && len < offset {
            info!(path = %path.display(), offset, size = len,
                "File shrunk below stored offset, starting from the beginning");
            self.metrics.files_truncated.inc();
            offset = 0;
        }
        let seek_result = if offset > 0 {
            file.seek(SeekFrom::Start(offset)).map(|_| ())
        } else if self.config.tail_files {
            file.seek(SeekFrom::End(0)).map(|pos| offset = pos)
        } else {
            Ok(())
        };
        if let Err(e) = seek_result {
            error!(path = %path.display(), error = %e, "Seek failed");
            return offset;
        }

        debug!(path = %path.display(), offset, "Harvester started");

        let mut reader = LineReader::new(file);
        let mut last_read = Instant::now();
        let mut line_no = 0u64;

        loop {
            if cancel.is_cancelled() {
                debug!(path = %path.display(), "Harvester cancelled");
                return offset;
            }

            match self.await_line(&mut reader, &path, cancel).await {
                Ok(Some(line)) => {
                    line_no += 1;
                    let next_offset = offset + line.consumed;
                    let event = Event {
                        source: path.clone(),
                        offset,
                        consumed: line.consumed,
                        line: line_no,
                        text: line.text,
                        timestamp: Utc::now(),
                        identity: Some(identity),
                    };
                    if self.events.send(event).await.is_err() {
                        debug!(path = %path.display(), "Spooler channel closed");
                        return offset;
                    }
                    offset = next_offset;
                    last_read = Instant::now();
                    self.metrics.events_emitted.inc();
                }
                Ok(None) => {
                    // Read timeout elapsed without a complete line. The
                    // truncation probe stats the open descriptor, not the
                    // path: after a rotation the path names an unrelated
                    // file while this descriptor follows the renamed one.
                    match reader.file_len() {
                        Ok(len) if len < offset => {
                            info!(path = %path.display(), offset, size = len,
                                "File was truncated, resetting offset");
                            self.metrics.files_truncated.inc();
                            if let Err(e) = reader.reset_to_start() {
                                error!(path = %path.display(), error = %e,
                                    "Failed to rewind after truncation");
                                return offset;
                            }
                            offset = 0;
                            line_no = 0;
                            last_read = Instant::now();
                        }
                        _ => {
                            if last_read.elapsed() > self.config.dead_time {
                                debug!(path = %path.display(), offset,
                                    "No new data within dead time, closing harvester");
                                return offset;
                            }
                        }
                    }
                }
                Err(e) => {
                    error!(path = %path.display(), error = %e, "Unrecoverable read error");
                    return offset;
                }
            }
        }
    }

    /// Wait up to `read_timeout` for the next complete line. `Ok(None)`
    /// means the timeout elapsed; the caller decides between truncation
    /// recovery and the dead-time cutoff.
    async fn await_line(
        &self,
        reader: &mut LineReader,
        path: &std::path::Path,
        cancel: &CancellationToken,
    ) -> std::io::Result<Option<Line>> {
        let deadline = Instant::now() + self.config.read_timeout;
        loop {
            match reader.read_line()? {
                ReadOutcome::Line(line) => return Ok(Some(line)),
                ReadOutcome::Eof => {
                    if cancel.is_cancelled() || Instant::now() >= deadline {
                        return Ok(None);
                    }
                    if reader.has_partial() {
                        debug!(path = %path.display(), "Partial line pending, waiting");
                    }
                    select! {
                        _ = sleep(self.config.backoff) => {}
                        _ = cancel.cancelled() => return Ok(None),
                    }
                }
            }
        }
    }

    /// Open the file with fixed backoff, bounded by `open_retry_limit`.
    /// Exhaustion ends this instance; a later scan can rediscover the file.
    async fn open_with_retry(
        &self,
        path: &std::path::Path,
        cancel: &CancellationToken,
    ) -> Option<(File, FileIdentity)> {
        let mut attempts = 0u32;
        loop {
            if cancel.is_cancelled() {
                return None;
            }

            match File::open(path) {
                Ok(file) => match file.metadata() {
                    Ok(md) if md.is_file() => match FileIdentity::from_file(&file) {
                        Ok(identity) => return Some((file, identity)),
                        Err(e) => {
                            warn!(path = %path.display(), error = %e,
                                "Failed to read file identity");
                        }
                    },
                    Ok(_) => {
                        error!(path = %path.display(), "Refusing to harvest non-regular file");
                        return None;
                    }
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "Failed to stat file");
                    }
                },
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to open file");
                }
            }

            attempts += 1;
            self.metrics.harvester_open_failures.inc();
            if attempts >= self.config.open_retry_limit {
                error!(path = %path.display(), attempts, "Giving up opening file");
                return None;
            }
            select! {
                _ = sleep(self.config.backoff) => {}
                _ = cancel.cancelled() => return None,
            }
        }
    }

    async fn run_stdin(&self, cancel: &CancellationToken) -> u64 {
        let stdin = tokio::io::stdin();
        let mut reader = tokio::io::BufReader::new(stdin);
        let mut buf = String::new();
        let mut offset = 0u64;
        let mut line_no = 0u64;

        debug!("Stdin harvester started");

        loop {
            buf.clear();
            let read = select! {
                res = reader.read_line(&mut buf) => res,
                _ = cancel.cancelled() => return offset,
            };
            match read {
                Ok(0) => return offset,
                Ok(n) => {
                    line_no += 1;
                    let text = buf.trim_end_matches(['\n', '\r']).to_string();
                    let event = Event {
                        source: PathBuf::from("-"),
                        offset,
                        consumed: n as u64,
                        line: line_no,
                        text,
                        timestamp: Utc::now(),
                        identity: None,
                    };
                    if self.events.send(event).await.is_err() {
                        return offset;
                    }
                    offset += n as u64;
                    self.metrics.events_emitted.inc();
                }
                Err(e) => {
                    error!(error = %e, "Stdin read error");
                    return offset;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bounded_channel::{bounded, BoundedReceiver};
    use std::io::Write;
    use tempfile::tempdir;

    fn test_config() -> HarvesterConfig {
        HarvesterConfig {
            read_timeout: Duration::from_millis(50),
            backoff: Duration::from_millis(10),
            dead_time: Duration::from_millis(200),
            open_retry_limit: 2,
            tail_files: false,
        }
    }

    fn spawn_harvester(
        path: PathBuf,
        offset: u64,
        config: HarvesterConfig,
    ) -> (
        BoundedReceiver<Event>,
        Arc<HarvesterHandle>,
        CancellationToken,
        tokio::task::JoinHandle<()>,
    ) {
        let (tx, rx) = bounded(64);
        let handle = HarvesterHandle::new();
        let cancel = CancellationToken::new();
        let harvester = Harvester::file(
            path,
            offset,
            config,
            tx,
            handle.clone(),
            PipelineMetrics::disabled(),
        );
        let task = tokio::spawn(harvester.run(cancel.clone()));
        (rx, handle, cancel, task)
    }

    #[tokio::test]
    async fn emits_lines_with_offsets() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("app.log");
        std::fs::write(&path, "one\ntwo\n").unwrap();

        let (mut rx, handle, cancel, task) = spawn_harvester(path, 0, test_config());

        let first = rx.next().await.unwrap();
        assert_eq!("one", first.text);
        assert_eq!(0, first.offset);
        assert_eq!(4, first.consumed);
        assert!(first.identity.is_some());

        let second = rx.next().await.unwrap();
        assert_eq!("two", second.text);
        assert_eq!(4, second.offset);
        assert_eq!(2, second.line);

        cancel.cancel();
        task.await.unwrap();
        assert_eq!(Some(8), handle.final_offset());
    }

    #[tokio::test]
    async fn resume_reports_stored_offset_on_first_event() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("app.log");
        std::fs::write(&path, "0123456789\nresumed line\n").unwrap();

        // Registry said 11 bytes were durably consumed.
        let (mut rx, _handle, cancel, task) = spawn_harvester(path, 11, test_config());

        let event = rx.next().await.unwrap();
        assert_eq!(11, event.offset);
        assert_eq!("resumed line", event.text);

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn truncation_resets_offset_and_continues() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("app.log");
        std::fs::write(&path, "a long original line\n").unwrap();

        let (mut rx, _handle, cancel, task) = spawn_harvester(path.clone(), 0, test_config());

        let first = rx.next().await.unwrap();
        assert_eq!("a long original line", first.text);

        // Truncate below the tracked offset and write fresh content.
        std::fs::write(&path, "new\n").unwrap();

        let second = rx.next().await.unwrap();
        assert_eq!("new", second.text);
        assert_eq!(0, second.offset);

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn dead_time_terminates_harvester() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("quiet.log");
        std::fs::write(&path, "only line\n").unwrap();

        let (mut rx, handle, _cancel, task) = spawn_harvester(path, 0, test_config());

        assert_eq!("only line", rx.next().await.unwrap().text);

        // No further writes: the harvester must stop on its own.
        task.await.unwrap();
        assert!(handle.is_finished());
        assert_eq!(Some(10), handle.final_offset());
        assert!(rx.next().await.is_none());
    }

    #[tokio::test]
    async fn rename_does_not_interrupt_harvest() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("app.log");
        let rotated = dir.path().join("app.log.1");
        std::fs::write(&path, "before rename\n").unwrap();

        let (mut rx, _handle, cancel, task) = spawn_harvester(path.clone(), 0, test_config());
        assert_eq!("before rename", rx.next().await.unwrap().text);

        std::fs::rename(&path, &rotated).unwrap();
        let mut f = std::fs::OpenOptions::new()
            .append(true)
            .open(&rotated)
            .unwrap();
        f.write_all(b"after rename\n").unwrap();
        f.flush().unwrap();

        let event = rx.next().await.unwrap();
        assert_eq!("after rename", event.text);
        assert_eq!(14, event.offset);

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn smaller_file_at_old_path_is_not_truncation() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("app.log");
        let rotated = dir.path().join("app.log.1");
        std::fs::write(&path, "0123456789\n").unwrap();

        let (mut rx, _handle, cancel, task) = spawn_harvester(path.clone(), 0, test_config());
        assert_eq!("0123456789", rx.next().await.unwrap().text);

        // Rotate, then recreate the path as a smaller unrelated file.
        std::fs::rename(&path, &rotated).unwrap();
        std::fs::write(&path, "x\n").unwrap();

        // Outlast a read timeout so the truncation probe runs while the
        // path is shorter than the tracked offset, then grow the renamed
        // file.
        sleep(Duration::from_millis(80)).await;
        let mut f = std::fs::OpenOptions::new()
            .append(true)
            .open(&rotated)
            .unwrap();
        f.write_all(b"tail\n").unwrap();
        f.flush().unwrap();

        let event = rx.next().await.unwrap();
        assert_eq!("tail", event.text);
        assert_eq!(11, event.offset);

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn open_failure_gives_up_after_retry_limit() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("never-exists.log");

        let metrics = PipelineMetrics::new();
        let (tx, _rx) = bounded(4);
        let handle = HarvesterHandle::new();
        let harvester = Harvester::file(
            path,
            37,
            test_config(),
            tx,
            handle.clone(),
            metrics.clone(),
        );
        harvester.run(CancellationToken::new()).await;

        assert!(handle.is_finished());
        // Resume offset is preserved for the next discovery.
        assert_eq!(Some(37), handle.final_offset());
        use crate::telemetry::Counter;
        assert_eq!(2, metrics.harvester_open_failures.get());
    }

    #[tokio::test]
    async fn tail_files_skips_existing_content() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("app.log");
        std::fs::write(&path, "old content\n").unwrap();

        let config = HarvesterConfig {
            tail_files: true,
            ..test_config()
        };
        let (mut rx, _handle, cancel, task) = spawn_harvester(path.clone(), 0, config);

        // Yield so the harvester opens and seeks to end before the append.
        sleep(Duration::from_millis(80)).await;
        let mut f = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        f.write_all(b"fresh\n").unwrap();
        f.flush().unwrap();

        let event = rx.next().await.unwrap();
        assert_eq!("fresh", event.text);
        assert_eq!(12, event.offset);

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn finished_handle_exposes_offset() {
        let handle = HarvesterHandle::new();
        assert!(!handle.is_finished());
        assert_eq!(None, handle.final_offset());

        handle.finish(99);
        assert!(handle.is_finished());
        assert_eq!(Some(99), handle.final_offset());

        let seeded = HarvesterHandle::finished_at(1024);
        assert_eq!(Some(1024), seeded.final_offset());
    }
}
