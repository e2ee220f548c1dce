// SPDX-License-Identifier: Apache-2.0

//! Agent wiring: builds the pipeline from a [`ShipperConfig`] and runs it
//! until the cancellation token fires.
//!
//! Shutdown is a cascade. Cancelling the source token stops the prospector,
//! which waits for its harvesters; once every event sender is gone the
//! spooler flushes and closes, the publisher drains its in-flight batches,
//! and the registrar persists one final time. The downstream stages are only
//! force-cancelled if the cascade stalls past the shutdown deadline.

use std::time::Duration;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::bounded_channel::bounded;
use crate::config::ShipperConfig;
use crate::error::{Error, Result};
use crate::harvester::{Harvester, HarvesterConfig, HarvesterHandle};
use crate::outputs::blackhole::BlackholeOutput;
use crate::outputs::console::ConsoleOutput;
use crate::outputs::OutputKind;
use crate::prospector::Prospector;
use crate::publisher::Publisher;
use crate::registry::registrar::Registrar;
use crate::registry::Registry;
use crate::spooler::Spooler;
use crate::telemetry::PipelineMetrics;

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

pub struct Agent {
    config: ShipperConfig,
}

impl Agent {
    pub fn new(config: ShipperConfig) -> Self {
        Self { config }
    }

    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        let config = self.config;
        config.validate().map_err(Error::Config)?;

        let metrics = PipelineMetrics::new();
        let registry = Registry::load(&config.registry_path);
        let stored_states: Vec<_> = registry.states().cloned().collect();

        info!(
            patterns = config.include.len(),
            states = stored_states.len(),
            output = %config.output,
            "Starting agent"
        );

        let (events_tx, events_rx) = bounded(config.queue_size);
        let (batches_tx, batches_rx) = bounded(config.queue_size);
        let (output_tx, output_rx) = bounded(config.queue_size);
        let (registrar_tx, registrar_rx) = bounded(config.queue_size);

        // Sources react to cancellation directly; the rest of the pipeline
        // drains via channel closure.
        let sources_cancel = cancel.child_token();
        let pipeline_cancel = CancellationToken::new();

        let registrar = Registrar::new(registry, registrar_rx, metrics.clone());
        let registrar_task = tokio::spawn(registrar.run(pipeline_cancel.clone()));

        let output_task = match config.output {
            OutputKind::Console => {
                tokio::spawn(ConsoleOutput::stdout(output_rx).run(pipeline_cancel.clone()))
            }
            OutputKind::Blackhole => {
                tokio::spawn(BlackholeOutput::new(output_rx).run(pipeline_cancel.clone()))
            }
        };

        let publisher = Publisher::new(
            batches_rx,
            output_tx,
            registrar_tx.clone(),
            config.publish_mode,
            config.queue_size,
            metrics.clone(),
        );
        let publisher_task = tokio::spawn(publisher.run(pipeline_cancel.clone()));

        let spooler = Spooler::new(
            config.spool_size,
            config.idle_timeout,
            events_rx,
            batches_tx,
        );
        let spooler_task = tokio::spawn(spooler.run(pipeline_cancel.clone()));

        let mut source_tasks = Vec::new();
        if !config.include.is_empty() {
            let prospector = Prospector::new(
                &config,
                stored_states,
                events_tx.clone(),
                registrar_tx.clone(),
                metrics.clone(),
            )?;
            source_tasks.push(tokio::spawn(prospector.run(sources_cancel.clone())));
        }
        if config.stdin {
            let harvester = Harvester::stdin(
                HarvesterConfig::from(&config),
                events_tx.clone(),
                HarvesterHandle::new(),
                metrics.clone(),
            );
            source_tasks.push(tokio::spawn(harvester.run(sources_cancel.clone())));
        }

        // Only sources may hold these senders, or the cascade never closes.
        drop(events_tx);
        drop(registrar_tx);

        // Sources exit on cancellation or on their own (stdin EOF).
        for task in source_tasks {
            if let Err(e) = task.await {
                error!(error = %e, "Source task panicked");
            }
        }
        info!("Sources stopped, draining pipeline");

        let drain = async {
            if let Err(e) = spooler_task.await {
                error!(error = %e, "Spooler task panicked");
            }
            if let Err(e) = publisher_task.await {
                error!(error = %e, "Publisher task panicked");
            }
            if let Err(e) = output_task.await {
                error!(error = %e, "Output task panicked");
            }
        };

        if timeout(SHUTDOWN_TIMEOUT, drain).await.is_err() {
            warn!("Pipeline drain exceeded shutdown deadline, forcing stop");
            pipeline_cancel.cancel();
        }

        // The registrar persists once more on its way out. Wait for that
        // write even after a forced stop, or acknowledged offsets are lost.
        match timeout(SHUTDOWN_TIMEOUT, registrar_task).await {
            Ok(Ok(result)) => result?,
            Ok(Err(e)) => error!(error = %e, "Registrar task panicked"),
            Err(_) => warn!("Registrar did not stop before the shutdown deadline"),
        }

        info!("Agent stopped");
        Ok(())
    }
}
