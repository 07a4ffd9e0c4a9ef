// src/motion/controller.rs - Async service wrapper around the planner
//
// Host-side stand-in for the firmware split: the spawned tick task plays
// the stepper interrupt pumping exec(), while the submission methods are
// the main-loop side, pacing themselves on queue space. Everything shares
// the planner through one RwLock, which keeps the two method families
// serialised the way the interrupt priority scheme does on hardware.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, RwLock};

use super::planner::{MotionPlanner, PlanError};
use super::pool::MCode;
use super::{QueueStats, AXES};

/// Most exec pumps per tick; bounds the time the tick task holds the lock.
const EXEC_BURST: usize = 32;

pub struct MotionController {
    planner: Arc<RwLock<MotionPlanner>>,
    shutdown_tx: broadcast::Sender<()>,
    tick: Duration,
}

impl MotionController {
    pub fn new(planner: MotionPlanner, tick: Duration) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            planner: Arc::new(RwLock::new(planner)),
            shutdown_tx,
            tick,
        }
    }

    /// Direct handle for callers that need planner access beyond the
    /// submission helpers.
    pub fn planner(&self) -> Arc<RwLock<MotionPlanner>> {
        self.planner.clone()
    }

    /// Spawn the exec tick task.
    pub fn start(&self) {
        let planner = self.planner.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let tick = self.tick;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        tracing::info!("motion tick loop shutting down");
                        break;
                    }
                    _ = interval.tick() => {
                        let mut planner = planner.write().await;
                        // main-loop callbacks first, then pump the executor
                        planner.plan_hold_callback();
                        planner.end_hold_callback();
                        for _ in 0..EXEC_BURST {
                            match planner.exec() {
                                Ok(super::ExecOutcome::NoOp) => break,
                                Ok(_) => {}
                                Err(e) => {
                                    tracing::error!("executor fault: {e}");
                                    planner.exec_fault = Some(e);
                                    break;
                                }
                            }
                        }
                    }
                }
            }
        });
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Queue a jerk-limited move, waiting for pool space if the queue is
    /// full.
    pub async fn submit_accel_line(
        &self,
        target: [f64; AXES],
        minutes: f64,
    ) -> Result<(), PlanError> {
        loop {
            {
                let mut planner = self.planner.write().await;
                if planner.queue_has_space() {
                    return planner.submit_accel_line(target, minutes);
                }
            }
            tokio::time::sleep(self.tick).await;
        }
    }

    /// Queue an unaccelerated straight move, waiting for pool space.
    pub async fn submit_line(&self, target: [f64; AXES], minutes: f64) -> Result<(), PlanError> {
        loop {
            {
                let mut planner = self.planner.write().await;
                if planner.queue_has_space() {
                    return planner.submit_line(target, minutes);
                }
            }
            tokio::time::sleep(self.tick).await;
        }
    }

    pub async fn submit_dwell(&self, seconds: f64) -> Result<(), PlanError> {
        loop {
            {
                let mut planner = self.planner.write().await;
                if planner.queue_has_space() {
                    return planner.submit_dwell(seconds);
                }
            }
            tokio::time::sleep(self.tick).await;
        }
    }

    pub async fn submit_mcode(&self, code: MCode) -> Result<(), PlanError> {
        loop {
            {
                let mut planner = self.planner.write().await;
                if planner.queue_has_space() {
                    return planner.submit_mcode(code);
                }
            }
            tokio::time::sleep(self.tick).await;
        }
    }

    pub async fn request_feedhold(&self) {
        self.planner.write().await.request_feedhold();
    }

    pub async fn end_feedhold(&self) {
        self.planner.write().await.end_feedhold();
    }

    pub async fn flush(&self) {
        self.planner.write().await.flush();
    }

    pub async fn stats(&self) -> QueueStats {
        self.planner.read().await.stats()
    }

    /// Wait until the queue has drained and motion has stopped.
    pub async fn wait_idle(&self) {
        loop {
            {
                let planner = self.planner.read().await;
                if planner.stats().length == 0 && !planner.is_busy() {
                    return;
                }
            }
            tokio::time::sleep(self.tick).await;
        }
    }
}
