//! Mount service actor.
//!
//! [`MountService`] owns a [`Mount`] and runs in a dedicated Tokio task. It
//! applies [`MountCommand`]s in arrival order and polls the device on a fixed
//! cadence between commands, so settle detection advances without any caller
//! involvement. [`MountHandle`] is the cloneable client side.
//!
//! # Example
//!
//! ```rust,ignore
//! let (handle, task) = MountService::new(mount, Duration::from_secs(1)).spawn();
//! handle.goto(EquatorialPosition::new(5.5, -5.4)).await?;
//! let status = handle.wait_until_stopped(Duration::from_secs(300)).await?;
//! handle.shutdown().await;
//! task.await?;
//! ```

use crate::messages::{MountCommand, ParkPoseRequest};
use mount_core::error::{MountError, MountResult};
use mount_core::state::{Mount, StatusReport};
use mount_core::types::{
    Direction, EquatorialPosition, HorizontalPosition, Motion, ObserverLocation, RateKind,
    SyncMode, TrackMode, TrackRate,
};
use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Command channel capacity.
const COMMAND_CAPACITY: usize = 32;

/// Actor owning the mount state machine.
pub struct MountService {
    mount: Mount,
    poll_interval: Duration,
}

impl MountService {
    pub fn new(mount: Mount, poll_interval: Duration) -> Self {
        Self {
            mount,
            poll_interval,
        }
    }

    /// Spawn the actor task and return its handle.
    pub fn spawn(self) -> (MountHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(COMMAND_CAPACITY);
        let poll_interval = self.poll_interval;
        let task = tokio::spawn(self.run(rx));
        (MountHandle { tx, poll_interval }, task)
    }

    /// Event loop: commands and periodic polls, until shutdown or all handles drop.
    pub async fn run(mut self, mut command_rx: mpsc::Receiver<MountCommand>) {
        info!(poll_ms = self.poll_interval.as_millis() as u64, "Mount service started");
        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                command = command_rx.recv() => {
                    match command {
                        Some(MountCommand::Shutdown { response }) => {
                            let _ = response.send(());
                            break;
                        }
                        Some(command) => self.handle(command).await,
                        None => break,
                    }
                }

                _ = ticker.tick() => self.poll().await,
            }
        }

        info!(state = self.mount.state().name(), "Mount service stopped");
    }

    async fn poll(&mut self) {
        if self.mount.firmware().is_none() {
            return;
        }
        let before = self.mount.state();
        match self.mount.refresh().await {
            Ok(status) if status.state != before => {
                info!(from = before.name(), to = status.state.name(), "Mount state changed");
            }
            Ok(_) => {}
            Err(e) => debug!(error = %e, "Poll failed"),
        }
    }

    async fn handle(&mut self, command: MountCommand) {
        let mount = &mut self.mount;
        match command {
            MountCommand::UpdateLocation { observer, response } => {
                let _ = response.send(mount.update_location(observer).await);
            }
            MountCommand::UpdateTime {
                utc,
                utc_offset_hours,
                response,
            } => {
                let _ = response.send(mount.update_time(utc, utc_offset_hours).await);
            }
            MountCommand::Goto { target, response } => {
                let _ = response.send(mount.goto(target).await);
            }
            MountCommand::Sync { target, response } => {
                let _ = response.send(mount.sync(target).await);
            }
            MountCommand::Park { response } => {
                let _ = response.send(mount.park().await);
            }
            MountCommand::Unpark { response } => {
                let _ = response.send(mount.unpark().await);
            }
            MountCommand::Abort { response } => {
                let _ = response.send(mount.abort().await);
            }
            MountCommand::SetTrackMode { mode, response } => {
                let _ = response.send(mount.set_track_mode(mode).await);
            }
            MountCommand::SetTrackRate { rate, response } => {
                let _ = response.send(mount.set_track_rate(rate).await);
            }
            MountCommand::Jog {
                direction,
                motion,
                response,
            } => {
                let _ = response.send(mount.jog(direction, motion).await);
            }
            MountCommand::PulseGuide {
                direction,
                duration,
                response,
            } => {
                let _ = response.send(mount.pulse_guide(direction, duration).await);
            }
            MountCommand::SetRate {
                kind,
                index,
                response,
            } => {
                let _ = response.send(mount.set_rate(kind, index).await);
            }
            MountCommand::SetSyncMode { mode, response } => {
                let _ = response.send(mount.set_sync_mode(mode).await);
            }
            MountCommand::SwapButtons {
                north_south,
                east_west,
                response,
            } => {
                let _ = response.send(mount.swap_buttons(north_south, east_west).await);
            }
            MountCommand::SetParkPose { request, response } => {
                let result = match request {
                    ParkPoseRequest::Explicit(pose) => mount.set_park_pose(pose).map(|()| pose),
                    ParkPoseRequest::Current => mount.set_park_to_current(),
                    ParkPoseRequest::Default => mount.set_default_park(),
                };
                let _ = response.send(result);
            }
            MountCommand::GetStatus { response } => {
                let _ = response.send(mount.status());
            }
            MountCommand::Refresh { response } => {
                let _ = response.send(mount.refresh().await);
            }
            MountCommand::Shutdown { response } => {
                warn!("Shutdown reached the command handler");
                let _ = response.send(());
            }
        }
    }
}

/// Client side of a running [`MountService`].
#[derive(Clone)]
pub struct MountHandle {
    tx: mpsc::Sender<MountCommand>,
    poll_interval: Duration,
}

impl MountHandle {
    async fn request<T>(
        &self,
        (command, rx): (MountCommand, oneshot::Receiver<MountResult<T>>),
    ) -> MountResult<T> {
        self.tx
            .send(command)
            .await
            .map_err(|_| MountError::Disconnected)?;
        rx.await.map_err(|_| MountError::Disconnected)?
    }

    pub async fn update_location(&self, observer: ObserverLocation) -> MountResult<()> {
        self.request(MountCommand::update_location(observer)).await
    }

    pub async fn update_time(&self, utc: DateTime<Utc>, utc_offset_hours: f64) -> MountResult<()> {
        self.request(MountCommand::update_time(utc, utc_offset_hours))
            .await
    }

    pub async fn goto(&self, target: EquatorialPosition) -> MountResult<()> {
        self.request(MountCommand::goto(target)).await
    }

    pub async fn sync(&self, target: EquatorialPosition) -> MountResult<()> {
        self.request(MountCommand::sync(target)).await
    }

    pub async fn park(&self) -> MountResult<()> {
        self.request(MountCommand::park()).await
    }

    pub async fn unpark(&self) -> MountResult<()> {
        self.request(MountCommand::unpark()).await
    }

    pub async fn abort(&self) -> MountResult<()> {
        self.request(MountCommand::abort()).await
    }

    pub async fn set_track_mode(&self, mode: TrackMode) -> MountResult<()> {
        self.request(MountCommand::set_track_mode(mode)).await
    }

    pub async fn set_track_rate(&self, rate: TrackRate) -> MountResult<()> {
        self.request(MountCommand::set_track_rate(rate)).await
    }

    pub async fn jog(&self, direction: Direction, motion: Motion) -> MountResult<()> {
        self.request(MountCommand::jog(direction, motion)).await
    }

    pub async fn pulse_guide(&self, direction: Direction, duration: Duration) -> MountResult<()> {
        self.request(MountCommand::pulse_guide(direction, duration))
            .await
    }

    pub async fn set_rate(&self, kind: RateKind, index: usize) -> MountResult<()> {
        self.request(MountCommand::set_rate(kind, index)).await
    }

    pub async fn set_sync_mode(&self, mode: SyncMode) -> MountResult<()> {
        self.request(MountCommand::set_sync_mode(mode)).await
    }

    pub async fn swap_buttons(&self, north_south: bool, east_west: bool) -> MountResult<()> {
        self.request(MountCommand::swap_buttons(north_south, east_west))
            .await
    }

    pub async fn set_park_pose(&self, request: ParkPoseRequest) -> MountResult<HorizontalPosition> {
        self.request(MountCommand::set_park_pose(request)).await
    }

    pub async fn refresh(&self) -> MountResult<StatusReport> {
        self.request(MountCommand::refresh()).await
    }

    pub async fn status(&self) -> MountResult<StatusReport> {
        let (command, rx) = MountCommand::status();
        self.tx
            .send(command)
            .await
            .map_err(|_| MountError::Disconnected)?;
        rx.await.map_err(|_| MountError::Disconnected)
    }

    /// Wait until the mount is neither slewing nor parking.
    ///
    /// Polling is left to the service; this only reads the status once per
    /// poll interval. Fails with [`MountError::Busy`] when `timeout` elapses.
    pub async fn wait_until_stopped(&self, timeout: Duration) -> MountResult<StatusReport> {
        let deadline = Instant::now() + timeout;
        loop {
            let status = self.status().await?;
            if !status.state.is_moving() {
                return Ok(status);
            }
            if Instant::now() >= deadline {
                return Err(MountError::Busy(format!(
                    "still {} after {:?}",
                    status.state.name(),
                    timeout
                )));
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Stop the service loop and wait for it to acknowledge.
    pub async fn shutdown(&self) {
        let (command, rx) = MountCommand::shutdown();
        if self.tx.send(command).await.is_ok() {
            let _ = rx.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mount_core::sim::SimTransport;
    use mount_core::{FixedClock, MemorySettingsStore, MountProtocol, MountSettings, MountState};
    use mount_driver_pmc8::{Pmc8Mount, Pmc8Simulator};
    use std::sync::Arc;

    async fn service() -> (MountHandle, JoinHandle<()>, SimTransport<Pmc8Simulator>) {
        let sim = SimTransport::new(Pmc8Simulator::new());
        let protocol: Arc<dyn MountProtocol> = Arc::new(Pmc8Mount::new(Arc::new(sim.clone())));
        let store = Arc::new(MemorySettingsStore::new(MountSettings::default()));
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let mut mount = Mount::new(protocol, store, clock).unwrap();
        mount.connect().await.unwrap();

        let (handle, task) = MountService::new(mount, Duration::from_millis(5)).spawn();
        handle
            .update_location(ObserverLocation::new(40.0, 250.0, 0.0))
            .await
            .unwrap();
        handle.update_time(Utc::now(), -7.0).await.unwrap();
        (handle, task, sim)
    }

    #[tokio::test]
    async fn polling_settles_a_goto() {
        let (handle, task, _sim) = service().await;
        handle.goto(EquatorialPosition::new(8.0, 20.0)).await.unwrap();

        let status = handle
            .wait_until_stopped(Duration::from_secs(5))
            .await
            .unwrap();
        assert!(matches!(status.state, MountState::Tracking { .. }));

        handle.shutdown().await;
        task.await.unwrap();
    }

    #[tokio::test]
    async fn park_and_unpark_through_handle() {
        let (handle, task, sim) = service().await;
        handle.park().await.unwrap();
        let status = handle
            .wait_until_stopped(Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(status.state, MountState::Parked);
        assert!(matches!(
            handle.goto(EquatorialPosition::new(1.0, 1.0)).await,
            Err(MountError::InvalidState { .. })
        ));

        handle.unpark().await.unwrap();
        assert_eq!(handle.status().await.unwrap().state, MountState::Idle);
        assert_eq!(sim.device().track_rate, 0x538);

        handle.shutdown().await;
        task.await.unwrap();
    }

    #[tokio::test]
    async fn park_pose_requests() {
        let (handle, task, _sim) = service().await;
        let pose = HorizontalPosition::new(180.0, 10.0);
        assert_eq!(
            handle.set_park_pose(ParkPoseRequest::Explicit(pose)).await.unwrap(),
            pose
        );
        let default = handle
            .set_park_pose(ParkPoseRequest::Default)
            .await
            .unwrap();
        assert!((default.altitude_degrees - 40.0).abs() < 1e-9);

        handle.shutdown().await;
        task.await.unwrap();
    }

    #[tokio::test]
    async fn handle_reports_disconnect_after_shutdown() {
        let (handle, task, _sim) = service().await;
        handle.shutdown().await;
        task.await.unwrap();
        assert_eq!(handle.park().await, Err(MountError::Disconnected));
        assert_eq!(handle.status().await, Err(MountError::Disconnected));
    }
}
