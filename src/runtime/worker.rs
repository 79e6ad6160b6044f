use std::sync::Arc;
use anyhow::Result;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use crate::config::SchedulerConfig;
use crate::generator::CodeGenerator;
use crate::runtime::protocol::{WorkerMessage, WorkerResponse};
use crate::runtime::scheduler::Scheduler;

/// 隔离执行上下文的调用方一端
/// The scheduler runs inside its own task and is reachable only through these
/// two channels of JSON frames.
pub struct WorkerHandle {
    pub inbound: mpsc::Sender<Value>,
    pub outbound: mpsc::Receiver<Value>,
    pub join: JoinHandle<()>,
}

/// Starts a worker task owning a fresh `Scheduler`.
/// Dropping every clone of `inbound` stops the worker and shuts its scheduler down.
/// Fails on a config with zero permits or zero channel capacity.
pub fn spawn_worker(config: &SchedulerConfig, generator: Arc<dyn CodeGenerator>) -> Result<WorkerHandle> {
    config.validate()?;

    let (inbound_tx, inbound_rx) = mpsc::channel(config.channel_capacity);
    let (outbound_tx, outbound_rx) = mpsc::channel(config.channel_capacity);
    let (event_tx, event_rx) = mpsc::channel(config.channel_capacity);

    let scheduler = Scheduler::new(config.max_permits, generator, event_tx);
    let join = tokio::spawn(run_worker(scheduler, inbound_rx, event_rx, outbound_tx));

    Ok(WorkerHandle {
        inbound: inbound_tx,
        outbound: outbound_rx,
        join,
    })
}

async fn run_worker(
    scheduler: Scheduler,
    mut inbound: mpsc::Receiver<Value>,
    mut events: mpsc::Receiver<WorkerResponse>,
    outbound: mpsc::Sender<Value>,
) {
    info!("Architecture worker started");

    loop {
        tokio::select! {
            frame = inbound.recv() => match frame {
                Some(frame) => handle_frame(&scheduler, frame),
                None => break,
            },
            Some(event) = events.recv() => {
                match event.encode() {
                    Ok(frame) => {
                        if outbound.send(frame).await.is_err() {
                            debug!(request_id = %event.request_id, "Manager side closed, event dropped");
                        }
                    }
                    Err(e) => error!(request_id = %event.request_id, error = %e, "Failed to encode worker event"),
                }
            }
        }
    }

    scheduler.shutdown();
    info!("Architecture worker stopped");
}

fn handle_frame(scheduler: &Scheduler, frame: Value) {
    match WorkerMessage::decode(frame) {
        Ok(WorkerMessage::AddRequest(add)) => {
            scheduler.submit(add.into());
        }
        Ok(WorkerMessage::CancelRequest(id)) => {
            scheduler.cancel(&id);
        }
        Err(e) => warn!(error = %e, "Ignoring inbound frame"),
    }
}
