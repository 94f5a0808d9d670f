//! Async engine actor
//!
//! One task owns the [`PositioningEngine`]. Measurement batches arrive on an
//! unbounded queue that only the solve tick drains; operator commands arrive on
//! a second channel and are answered over `oneshot`. Each successful solve is
//! published on a `watch` channel.

use std::fmt;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::algorithms::CalibrationReport;
use crate::api::engine::{
    AnchorSnapshot, CalibrationReference, EngineSnapshot, EngineUpdate, PositioningEngine,
};
use crate::core::{Anchor, AutoAddPolicy, Point2, RangeBatch};
use crate::processing::{ControlCommand, EstimateKind};
use crate::validation::{PositioningError, PositioningResult};

const COMMAND_QUEUE_DEPTH: usize = 32;

/// Errors returned by [`EngineHandle`]
#[derive(Debug, Clone, PartialEq)]
pub enum ServiceError {
    /// The engine task has stopped
    ChannelClosed,
    /// The engine refused the request
    Positioning(PositioningError),
}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceError::ChannelClosed => write!(f, "Engine task is no longer running"),
            ServiceError::Positioning(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for ServiceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ServiceError::Positioning(e) => Some(e),
            ServiceError::ChannelClosed => None,
        }
    }
}

impl From<PositioningError> for ServiceError {
    fn from(error: PositioningError) -> Self {
        ServiceError::Positioning(error)
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;

/// What an operator command did
#[derive(Debug, Clone, PartialEq)]
pub enum ControlOutcome {
    Calibrated(CalibrationReport),
    AnchorUpserted { created: bool },
    AnchorDeleted(Anchor),
    PolicyChanged { previous: AutoAddPolicy },
    /// Current anchor table, for `anchors` and `save`
    Anchors(Vec<AnchorSnapshot>),
}

enum EngineCommand {
    UpsertAnchor {
        id: String,
        x: f64,
        y: f64,
        bias: Option<f64>,
        reply: oneshot::Sender<PositioningResult<bool>>,
    },
    DeleteAnchor {
        id: String,
        reply: oneshot::Sender<PositioningResult<Anchor>>,
    },
    SetPolicy {
        policy: AutoAddPolicy,
        reply: oneshot::Sender<AutoAddPolicy>,
    },
    Calibrate {
        reference: CalibrationReference,
        reply: oneshot::Sender<PositioningResult<CalibrationReport>>,
    },
    Snapshot {
        reply: oneshot::Sender<EngineSnapshot>,
    },
    Shutdown {
        reply: oneshot::Sender<PositioningEngine>,
    },
}

/// Cloneable handle to a running engine task
#[derive(Clone)]
pub struct EngineHandle {
    batches: mpsc::UnboundedSender<RangeBatch>,
    commands: mpsc::Sender<EngineCommand>,
    updates: watch::Receiver<Option<EngineUpdate>>,
}

pub struct EngineService;

impl EngineService {
    /// Move `engine` onto its own task, solving every `tick_interval`
    pub fn spawn(engine: PositioningEngine, tick_interval: Duration) -> EngineHandle {
        let (batch_tx, batch_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        let (update_tx, update_rx) = watch::channel(None);

        tokio::spawn(run(engine, tick_interval, batch_rx, command_rx, update_tx));

        EngineHandle {
            batches: batch_tx,
            commands: command_tx,
            updates: update_rx,
        }
    }
}

async fn run(
    mut engine: PositioningEngine,
    tick_interval: Duration,
    mut batches: mpsc::UnboundedReceiver<RangeBatch>,
    mut commands: mpsc::Receiver<EngineCommand>,
    updates: watch::Sender<Option<EngineUpdate>>,
) {
    let mut ticker = tokio::time::interval(tick_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!(tick_ms = tick_interval.as_millis() as u64, "engine task started");

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                solve_pending(&mut engine, &mut batches, &updates);
            }
            command = commands.recv() => match command {
                Some(command) => {
                    if let Some(reply) = handle_command(&mut engine, command) {
                        // Batches queued before shutdown still count
                        solve_pending(&mut engine, &mut batches, &updates);
                        batches.close();
                        commands.close();
                        info!("engine task stopping");
                        let _ = reply.send(engine);
                        return;
                    }
                }
                None => {
                    info!("all engine handles dropped, stopping");
                    return;
                }
            },
        }
    }
}

fn solve_pending(
    engine: &mut PositioningEngine,
    batches: &mut mpsc::UnboundedReceiver<RangeBatch>,
    updates: &watch::Sender<Option<EngineUpdate>>,
) {
    let mut pending = Vec::new();
    while let Ok(batch) = batches.try_recv() {
        pending.push(batch);
    }

    match engine.tick(pending) {
        Some(Ok(update)) => {
            updates.send_replace(Some(update));
        }
        Some(Err(e)) if e.is_transient() => debug!(error = %e, "no estimate this tick"),
        Some(Err(e)) => warn!(kind = e.error_type(), error = %e, "solve failed"),
        None => {}
    }
}

/// Apply one command; returns the reply channel when the command is a shutdown
fn handle_command(
    engine: &mut PositioningEngine,
    command: EngineCommand,
) -> Option<oneshot::Sender<PositioningEngine>> {
    // A dropped reply receiver only means the caller stopped waiting
    match command {
        EngineCommand::UpsertAnchor { id, x, y, bias, reply } => {
            let result = engine.upsert_anchor(&id, x, y, bias);
            if let Err(e) = &result {
                warn!(anchor_id = %id, kind = e.error_type(), severity = ?e.severity(), "anchor upsert refused");
            }
            let _ = reply.send(result);
        }
        EngineCommand::DeleteAnchor { id, reply } => {
            let _ = reply.send(engine.delete_anchor(&id));
        }
        EngineCommand::SetPolicy { policy, reply } => {
            let _ = reply.send(engine.set_auto_add_policy(policy));
        }
        EngineCommand::Calibrate { reference, reply } => {
            let _ = reply.send(engine.calibrate(reference));
        }
        EngineCommand::Snapshot { reply } => {
            let _ = reply.send(engine.snapshot());
        }
        EngineCommand::Shutdown { reply } => return Some(reply),
    }
    None
}

impl EngineHandle {
    /// Producer side of the measurement queue
    pub fn ingest_sender(&self) -> mpsc::UnboundedSender<RangeBatch> {
        self.batches.clone()
    }

    /// Queue one batch for the next tick
    pub fn ingest(&self, batch: RangeBatch) -> ServiceResult<()> {
        self.batches.send(batch).map_err(|_| ServiceError::ChannelClosed)
    }

    /// Receiver that sees every published estimate
    pub fn subscribe(&self) -> watch::Receiver<Option<EngineUpdate>> {
        self.updates.clone()
    }

    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> EngineCommand) -> ServiceResult<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(build(reply_tx))
            .await
            .map_err(|_| ServiceError::ChannelClosed)?;
        reply_rx.await.map_err(|_| ServiceError::ChannelClosed)
    }

    pub async fn upsert_anchor(&self, id: &str, x: f64, y: f64, bias: Option<f64>) -> ServiceResult<bool> {
        let id = id.to_string();
        Ok(self
            .request(|reply| EngineCommand::UpsertAnchor { id, x, y, bias, reply })
            .await??)
    }

    pub async fn delete_anchor(&self, id: &str) -> ServiceResult<Anchor> {
        let id = id.to_string();
        Ok(self.request(|reply| EngineCommand::DeleteAnchor { id, reply }).await??)
    }

    pub async fn set_auto_add_policy(&self, policy: AutoAddPolicy) -> ServiceResult<AutoAddPolicy> {
        self.request(|reply| EngineCommand::SetPolicy { policy, reply }).await
    }

    pub async fn calibrate(&self, reference: CalibrationReference) -> ServiceResult<CalibrationReport> {
        Ok(self
            .request(|reply| EngineCommand::Calibrate { reference, reply })
            .await??)
    }

    pub async fn snapshot(&self) -> ServiceResult<EngineSnapshot> {
        self.request(|reply| EngineCommand::Snapshot { reply }).await
    }

    /// Run one decoded operator command against the engine
    pub async fn execute(&self, command: ControlCommand) -> ServiceResult<ControlOutcome> {
        match command {
            ControlCommand::Calibrate { at, reference } => {
                let reference = match (at, reference) {
                    (Some([x, y]), _) => CalibrationReference::Known(Point2::new(x, y)),
                    (None, EstimateKind::Raw) => CalibrationReference::Raw,
                    (None, EstimateKind::Smoothed) => CalibrationReference::Smoothed,
                };
                self.calibrate(reference).await.map(ControlOutcome::Calibrated)
            }
            ControlCommand::UpsertAnchor { id, x, y, bias } => {
                let created = self.upsert_anchor(&id, x, y, bias).await?;
                Ok(ControlOutcome::AnchorUpserted { created })
            }
            ControlCommand::DeleteAnchor { id } => self.delete_anchor(&id).await.map(ControlOutcome::AnchorDeleted),
            ControlCommand::SetPolicy { policy } => {
                let previous = self.set_auto_add_policy(policy).await?;
                Ok(ControlOutcome::PolicyChanged { previous })
            }
            ControlCommand::ShowAnchors | ControlCommand::SaveConfig { .. } => {
                Ok(ControlOutcome::Anchors(self.snapshot().await?.anchors))
            }
        }
    }

    /// Stop the task after a final drain and take the engine back
    pub async fn shutdown(&self) -> ServiceResult<PositioningEngine> {
        self.request(|reply| EngineCommand::Shutdown { reply }).await
    }
}
