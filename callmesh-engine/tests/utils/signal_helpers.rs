use anyhow::{Context, Result, bail};
use callmesh_engine::{CallEvent, CallHandle, CallState};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

/// Timeout for engine reactions to a single step.
pub const STEP_TIMEOUT: Duration = Duration::from_secs(5);

/// Wait until the engine reports `state`.
pub async fn wait_for_state(handle: &CallHandle, state: CallState) -> Result<()> {
    wait_for_state_within(handle, state, STEP_TIMEOUT).await
}

pub async fn wait_for_state_within(
    handle: &CallHandle,
    state: CallState,
    within: Duration,
) -> Result<()> {
    let mut watch = handle.watch();
    tokio::time::timeout(within, watch.wait_for(|snapshot| snapshot.state == state))
        .await
        .with_context(|| format!("Timed out waiting for {:?}, still {:?}", state, handle.state()))?
        .context("Engine stopped")?;
    Ok(())
}

/// Wait until every given handle reports `state`.
pub async fn wait_all(handles: &[&CallHandle], state: CallState) -> Result<()> {
    for handle in handles {
        wait_for_state(handle, state).await?;
    }
    Ok(())
}

/// Wait for the first event matching `pred`, skipping everything else.
pub async fn wait_for_event<F>(
    events: &mut broadcast::Receiver<CallEvent>,
    within: Duration,
    mut pred: F,
) -> Result<CallEvent>
where
    F: FnMut(&CallEvent) -> bool,
{
    tokio::time::timeout(within, async {
        loop {
            match events.recv().await {
                Ok(event) if pred(&event) => return Ok(event),
                Ok(_) | Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => bail!("Event stream closed"),
            }
        }
    })
    .await
    .context("Timed out waiting for event")?
}

/// Everything already queued on `events`, without waiting.
pub fn drain_events(events: &mut broadcast::Receiver<CallEvent>) -> Vec<CallEvent> {
    let mut drained = Vec::new();
    loop {
        match events.try_recv() {
            Ok(event) => drained.push(event),
            Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
            Err(_) => return drained,
        }
    }
}

/// Let spawned tasks run until the engines have nothing left to do.
pub async fn settle() {
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
}
