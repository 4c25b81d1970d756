use algocash_sdk::ReplenishOutcome;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::PayoutMode;
use crate::server::RelayerState;

/// Periodic pool check, periodic resume of pending redemptions, and a
/// replenish check after every redemption.
pub fn spawn_background(state: Arc<RelayerState>) -> Vec<JoinHandle<()>> {
    let mut handles = vec![spawn_resume_loop(state.clone())];
    if state.config.payout_mode == PayoutMode::Pool {
        handles.push(spawn_replenish_loop(state.clone()));
        handles.push(spawn_redemption_listener(state));
    }
    handles
}

async fn replenish(state: &RelayerState) {
    match state.pool.replenish_if_needed().await {
        Ok(ReplenishOutcome::Replenished { amount, round, .. }) => {
            info!("✓ Replenished pool with {} (round {})", amount, round)
        }
        Ok(ReplenishOutcome::AboveThreshold { balance }) => {
            debug!("Pool balance {} above threshold", balance)
        }
        Ok(ReplenishOutcome::InFlight) => {}
        Err(e) => warn!("✗ Pool replenishment failed: {}", e),
    }
}

fn spawn_replenish_loop(state: Arc<RelayerState>) -> JoinHandle<()> {
    let period = Duration::from_secs(state.config.replenish_interval_secs.max(1));
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            replenish(&state).await;
        }
    })
}

fn spawn_resume_loop(state: Arc<RelayerState>) -> JoinHandle<()> {
    let period = Duration::from_secs(state.config.resume_interval_secs.max(1));
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            match state.store.resume_pending().await {
                Ok(finished) => {
                    for redemption in &finished {
                        info!(
                            "✓ Resumed redemption of {} to {}",
                            redemption.code, redemption.destination
                        );
                    }
                }
                Err(e) => warn!("✗ Could not scan for pending redemptions: {}", e),
            }
        }
    })
}

fn spawn_redemption_listener(state: Arc<RelayerState>) -> JoinHandle<()> {
    let mut events = state.store.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    debug!("Redemption of {} paid {}", event.code, event.amount);
                    replenish(&state).await;
                }
                Err(RecvError::Lagged(missed)) => {
                    warn!("Missed {} redemption events", missed);
                    replenish(&state).await;
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}
