// SPDX-License-Identifier: Apache-2.0

//! Prospector: periodic scans that discover files and manage harvester
//! lifecycle.
//!
//! Each pass stats every matching path and classifies it against the
//! in-memory last-seen map (this loop is its only writer) and the registry
//! state loaded at startup: new, dead on arrival, resumed, renamed, rotated
//! or unchanged. Rotated-away identities stay in a per-scan missing set so
//! content reappearing under another path within the same pass is adopted as
//! a rename instead of being re-read from zero.

pub mod finder;

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::select;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bounded_channel::BoundedSender;
use crate::config::ShipperConfig;
use crate::error::Result;
use crate::event::Event;
use crate::harvester::{Harvester, HarvesterConfig, HarvesterHandle};
use crate::identity::FileIdentity;
use crate::registry::registrar::RegistryUpdate;
use crate::registry::FileState;
use crate::telemetry::PipelineMetrics;

use finder::FileFinder;

/// A path the prospector has seen, with the completion handle of the
/// harvester that owns (or last owned) it.
struct TrackedFile {
    state: FileState,
    handle: Arc<HarvesterHandle>,
}

pub struct Prospector {
    finder: FileFinder,
    scan_frequency: std::time::Duration,
    dead_time: std::time::Duration,
    clean_iterations: u64,
    harvester_config: HarvesterConfig,
    /// Last-seen map keyed by path. Single writer: this loop.
    states: HashMap<PathBuf, TrackedFile>,
    /// Persisted state loaded at startup, consumed as files are matched.
    registry_states: HashMap<PathBuf, FileState>,
    events_tx: BoundedSender<Event>,
    registrar_tx: BoundedSender<RegistryUpdate>,
    harvesters: JoinSet<()>,
    metrics: PipelineMetrics,
    iteration: u64,
}

impl Prospector {
    pub fn new(
        config: &ShipperConfig,
        registry_states: Vec<FileState>,
        events_tx: BoundedSender<Event>,
        registrar_tx: BoundedSender<RegistryUpdate>,
        metrics: PipelineMetrics,
    ) -> Result<Self> {
        let finder = FileFinder::new(config.include.clone(), config.exclude.clone())?;
        Ok(Self {
            finder,
            scan_frequency: config.scan_frequency,
            dead_time: config.dead_time,
            clean_iterations: config.clean_iterations,
            harvester_config: HarvesterConfig::from(config),
            states: HashMap::new(),
            registry_states: registry_states
                .into_iter()
                .map(|s| (s.source.clone(), s))
                .collect(),
            events_tx,
            registrar_tx,
            harvesters: JoinSet::new(),
            metrics,
            iteration: 0,
        })
    }

    /// Scan on a fixed interval until cancelled, then wait for all
    /// harvesters to report their final offsets.
    pub async fn run(mut self, cancel: CancellationToken) {
        info!(states = self.registry_states.len(), "Prospector started");
        let mut interval = tokio::time::interval(self.scan_frequency);

        loop {
            select! {
                biased;

                _ = cancel.cancelled() => {
                    debug!("Prospector cancelled");
                    break;
                }

                _ = interval.tick() => {
                    self.scan(&cancel).await;
                    self.cleanup();
                }
            }
        }

        // Harvesters observe the same token at their read boundaries; wait
        // for each to publish its final offset.
        while self.harvesters.join_next().await.is_some() {}
        info!("Prospector stopped");
    }

    /// One scan pass. Public within the crate for tests.
    pub(crate) async fn scan(&mut self, cancel: &CancellationToken) {
        self.iteration += 1;
        let scan_start = SystemTime::now();

        let paths = match self.finder.find() {
            Ok(paths) => paths,
            Err(e) => {
                warn!(error = %e, "Scan failed to expand patterns");
                return;
            }
        };
        debug!(iteration = self.iteration, files = paths.len(), "Scanning");

        // Identities rotated away during this pass; reclaimable as renames
        // until the pass ends.
        let mut missing: HashMap<FileIdentity, TrackedFile> = HashMap::new();

        for path in paths {
            if cancel.is_cancelled() {
                return;
            }

            let metadata = match fs::metadata(&path) {
                Ok(md) if md.is_file() => md,
                Ok(_) => {
                    debug!(path = %path.display(), "Skipping non-regular file");
                    continue;
                }
                Err(e) => {
                    debug!(path = %path.display(), error = %e, "stat failed, skipping");
                    continue;
                }
            };
            let identity = match FileIdentity::from_path(&path) {
                Ok(identity) => identity,
                Err(e) => {
                    debug!(path = %path.display(), error = %e,
                        "Failed to read file identity, skipping");
                    continue;
                }
            };

            if self.states.contains_key(&path) {
                self.check_tracked(&path, &metadata, identity, cancel, &mut missing)
                    .await;
            } else {
                self.check_unseen(path, &metadata, identity, scan_start, cancel, &mut missing)
                    .await;
            }
        }
        // Entries still in `missing` were rotated away and never reappeared;
        // their harvesters wind down on their own via the dead time.
    }

    /// Classification for a path not present in the last-seen map.
    async fn check_unseen(
        &mut self,
        path: PathBuf,
        metadata: &fs::Metadata,
        identity: FileIdentity,
        scan_start: SystemTime,
        cancel: &CancellationToken,
        missing: &mut HashMap<FileIdentity, TrackedFile>,
    ) {
        // Rename mid-run: a tracked path now carries this identity's content
        // under a different name.
        let renamed_from = self
            .states
            .iter()
            .find(|(p, t)| **p != path && t.state.identity == identity)
            .map(|(p, _)| p.clone());
        if let Some(old_path) = renamed_from {
            let tracked = self
                .states
                .remove(&old_path)
                .map(|t| self.adopt_rename(t, &path));
            if let Some(tracked) = tracked {
                info!(from = %old_path.display(), to = %path.display(),
                    offset = tracked.state.offset, "File rename detected");
                // An active harvester follows the descriptor through the
                // rename; its events keep the registry current. Only a
                // finished file needs its state re-seeded under the new path.
                if tracked.handle.is_finished() {
                    self.seed_registrar(tracked.state.clone()).await;
                }
                self.states.insert(path, tracked);
            }
            return;
        }

        // Rotated away earlier in this same pass, reappearing here.
        if let Some(tracked) = missing.remove(&identity) {
            let old_path = tracked.state.source.clone();
            let tracked = self.adopt_rename(tracked, &path);
            info!(from = %old_path.display(), to = %path.display(),
                offset = tracked.state.offset, "Rotated file reappeared, treating as rename");
            if tracked.handle.is_finished() {
                self.seed_registrar(tracked.state.clone()).await;
            }
            self.states.insert(path, tracked);
            return;
        }

        let dead_on_arrival = scan_start
            .duration_since(modified_time(metadata))
            .map(|age| age > self.dead_time)
            .unwrap_or(false);

        // Prior persisted state, under this or any other path.
        let previous = self
            .registry_states
            .remove(&path)
            .or_else(|| self.take_registry_state_by_identity(&identity));

        if let Some(previous) = previous {
            if dead_on_arrival {
                // Known file, still inactive: track it without reading.
                debug!(path = %path.display(), offset = previous.offset,
                    "Known file is older than dead time, not harvesting");
                self.track_without_harvester(path, previous.offset, identity);
                return;
            }
            if previous.source != path {
                info!(from = %previous.source.display(), to = %path.display(),
                    offset = previous.offset, "File renamed across restart");
                self.metrics.files_renamed.inc();
            } else {
                debug!(path = %path.display(), offset = previous.offset, "Resuming file");
            }
            let offset = previous.offset;
            self.start_harvester(path, offset, identity, cancel).await;
            return;
        }

        if dead_on_arrival {
            // Never seen before and inactive: record resume-from-end state
            // so a later modification picks up only new content.
            let size = metadata.len();
            debug!(path = %path.display(), size,
                "File is older than dead time, seeding state at end of file");
            self.track_without_harvester(path.clone(), size, identity);
            self.seed_registrar(FileState {
                source: path,
                offset: size,
                identity,
                finished: true,
                last_seen_iteration: self.iteration,
            })
            .await;
            return;
        }

        debug!(path = %path.display(), "Starting harvester for new file");
        self.start_harvester(path, 0, identity, cancel).await;
    }

    /// Classification for a path already in the last-seen map.
    async fn check_tracked(
        &mut self,
        path: &Path,
        metadata: &fs::Metadata,
        identity: FileIdentity,
        cancel: &CancellationToken,
        missing: &mut HashMap<FileIdentity, TrackedFile>,
    ) {
        let (rotated, finished, stored_offset) = match self.states.get_mut(path) {
            Some(tracked) => {
                tracked.state.last_seen_iteration = self.iteration;
                // A finished harvester's final offset is the resume point.
                if let Some(offset) = tracked.handle.final_offset() {
                    tracked.state.offset = offset;
                    tracked.state.finished = true;
                }
                (
                    tracked.state.identity != identity,
                    tracked.handle.is_finished(),
                    tracked.state.offset,
                )
            }
            None => return,
        };

        if rotated {
            // The path now names an unrelated file. Keep the old identity
            // reclaimable for the remainder of this pass.
            if let Some(old) = self.states.remove(path) {
                info!(path = %path.display(), old = %old.state.identity, new = %identity,
                    "File rotation detected, starting from the beginning");
                missing.insert(old.state.identity, old);
            }
            self.start_harvester(path.to_path_buf(), 0, identity, cancel)
                .await;
            return;
        }

        if !finished {
            // A harvester owns this file; never start a second one.
            debug!(path = %path.display(), "Harvester still active");
            return;
        }

        let size = metadata.len();
        if size > stored_offset {
            debug!(path = %path.display(), offset = stored_offset, size,
                "File grew, resuming harvest");
            self.start_harvester(path.to_path_buf(), stored_offset, identity, cancel)
                .await;
        } else if size < stored_offset {
            debug!(path = %path.display(), size, offset = stored_offset,
                "File truncated while idle, starting from the beginning");
            self.metrics.files_truncated.inc();
            self.start_harvester(path.to_path_buf(), 0, identity, cancel)
                .await;
        }
        // Unchanged: nothing to do.
    }

    fn adopt_rename(&self, mut tracked: TrackedFile, new_path: &Path) -> TrackedFile {
        if let Some(offset) = tracked.handle.final_offset() {
            tracked.state.offset = offset;
            tracked.state.finished = true;
        }
        tracked.state.source = new_path.to_path_buf();
        tracked.state.last_seen_iteration = self.iteration;
        self.metrics.files_renamed.inc();
        tracked
    }

    fn take_registry_state_by_identity(&mut self, identity: &FileIdentity) -> Option<FileState> {
        let path = self
            .registry_states
            .iter()
            .find(|(_, s)| s.identity == *identity)
            .map(|(p, _)| p.clone())?;
        self.registry_states.remove(&path)
    }

    fn track_without_harvester(&mut self, path: PathBuf, offset: u64, identity: FileIdentity) {
        let mut state = FileState::new(path.clone(), offset, identity);
        state.finished = true;
        state.last_seen_iteration = self.iteration;
        self.states.insert(
            path,
            TrackedFile {
                state,
                handle: HarvesterHandle::finished_at(offset),
            },
        );
    }

    async fn start_harvester(
        &mut self,
        path: PathBuf,
        offset: u64,
        identity: FileIdentity,
        cancel: &CancellationToken,
    ) {
        let handle = HarvesterHandle::new();
        let harvester = Harvester::file(
            path.clone(),
            offset,
            self.harvester_config.clone(),
            self.events_tx.clone(),
            handle.clone(),
            self.metrics.clone(),
        );
        let cancel = cancel.clone();
        self.harvesters.spawn(harvester.run(cancel));

        let mut state = FileState::new(path.clone(), offset, identity);
        state.last_seen_iteration = self.iteration;
        // Re-confirm resumed state so the registry reflects what is being
        // harvested under which path.
        if offset > 0 {
            self.seed_registrar(state.clone()).await;
        }
        self.states.insert(path, TrackedFile { state, handle });
    }

    async fn seed_registrar(&self, state: FileState) {
        if self
            .registrar_tx
            .send(RegistryUpdate::Seed(state))
            .await
            .is_err()
        {
            warn!("Registrar channel closed, state seed dropped");
        }
    }

    /// Drop entries absent for more than `clean_iterations` scans whose
    /// harvester has finished. Registry entries are untouched.
    fn cleanup(&mut self) {
        let iteration = self.iteration;
        let clean_iterations = self.clean_iterations;
        let before = self.states.len();
        self.states.retain(|path, tracked| {
            let absent = iteration.saturating_sub(tracked.state.last_seen_iteration);
            if absent > clean_iterations && tracked.handle.is_finished() {
                debug!(path = %path.display(), absent, "Dropping vanished file from memory");
                false
            } else {
                true
            }
        });
        if before != self.states.len() {
            debug!(
                removed = before - self.states.len(),
                remaining = self.states.len(),
                "Prospector state cleanup"
            );
        }
    }

    #[cfg(test)]
    fn tracked_offset(&self, path: &Path) -> Option<u64> {
        self.states.get(path).map(|t| {
            t.handle
                .final_offset()
                .unwrap_or(t.state.offset)
        })
    }

    #[cfg(test)]
    fn is_tracked(&self, path: &Path) -> bool {
        self.states.contains_key(path)
    }
}

fn modified_time(metadata: &fs::Metadata) -> SystemTime {
    metadata.modified().unwrap_or_else(|_| SystemTime::now())
}
