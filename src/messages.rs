//! Message types for the mount service actor.
//!
//! The [`MountService`](crate::service::MountService) task is the single owner
//! of the [`Mount`](mount_core::Mount) state machine. Callers talk to it by
//! sending [`MountCommand`]s over an mpsc channel; each command carries a
//! oneshot sender for its reply.
//!
//! ```text
//! Caller                              Service task
//! ------                              ------------
//! 1. Create command with oneshot
//! 2. Send via mpsc channel    ------>
//!                                     3. Apply intent to Mount
//!                                     4. Send result
//! 5. Await oneshot receiver   <------
//! ```
//!
//! Each variant has a helper that builds the command and returns the receiver:
//!
//! ```rust
//! use rust_mount::messages::MountCommand;
//!
//! let (cmd, rx) = MountCommand::status();
//! // cmd_tx.send(cmd).await?;
//! // let status = rx.await?;
//! ```

use chrono::{DateTime, Utc};
use mount_core::error::MountResult;
use mount_core::state::StatusReport;
use mount_core::types::{
    Direction, EquatorialPosition, HorizontalPosition, Motion, ObserverLocation, RateKind,
    SyncMode, TrackMode, TrackRate,
};
use std::time::Duration;
use tokio::sync::oneshot;

/// Reply channel of a command.
pub type Reply<T> = oneshot::Sender<MountResult<T>>;

/// Where future parks go.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParkPoseRequest {
    /// Azimuth/altitude, north-referenced
    Explicit(HorizontalPosition),
    /// Wherever the mount points now
    Current,
    /// Pole-pointing default for the site
    Default,
}

/// Commands accepted by the mount service.
#[derive(Debug)]
pub enum MountCommand {
    /// Site position; runs the first-connect sequence once time is also known.
    UpdateLocation {
        observer: ObserverLocation,
        response: Reply<()>,
    },

    /// UTC time and east-positive offset of local time.
    UpdateTime {
        utc: DateTime<Utc>,
        utc_offset_hours: f64,
        response: Reply<()>,
    },

    Goto {
        target: EquatorialPosition,
        response: Reply<()>,
    },

    Sync {
        target: EquatorialPosition,
        response: Reply<()>,
    },

    Park {
        response: Reply<()>,
    },

    Unpark {
        response: Reply<()>,
    },

    Abort {
        response: Reply<()>,
    },

    SetTrackMode {
        mode: TrackMode,
        response: Reply<()>,
    },

    SetTrackRate {
        rate: TrackRate,
        response: Reply<()>,
    },

    Jog {
        direction: Direction,
        motion: Motion,
        response: Reply<()>,
    },

    PulseGuide {
        direction: Direction,
        duration: Duration,
        response: Reply<()>,
    },

    SetRate {
        kind: RateKind,
        index: usize,
        response: Reply<()>,
    },

    SetSyncMode {
        mode: SyncMode,
        response: Reply<()>,
    },

    SwapButtons {
        north_south: bool,
        east_west: bool,
        response: Reply<()>,
    },

    /// Returns the pose now in effect.
    SetParkPose {
        request: ParkPoseRequest,
        response: Reply<HorizontalPosition>,
    },

    /// Last-known status without polling the device.
    GetStatus {
        response: oneshot::Sender<StatusReport>,
    },

    /// Poll the device now.
    Refresh {
        response: Reply<StatusReport>,
    },

    /// Stop the service loop. Motion in progress is not aborted.
    Shutdown {
        response: oneshot::Sender<()>,
    },
}

impl MountCommand {
    pub fn update_location(observer: ObserverLocation) -> (Self, oneshot::Receiver<MountResult<()>>) {
        let (tx, rx) = oneshot::channel();
        (Self::UpdateLocation { observer, response: tx }, rx)
    }

    pub fn update_time(
        utc: DateTime<Utc>,
        utc_offset_hours: f64,
    ) -> (Self, oneshot::Receiver<MountResult<()>>) {
        let (tx, rx) = oneshot::channel();
        (
            Self::UpdateTime {
                utc,
                utc_offset_hours,
                response: tx,
            },
            rx,
        )
    }

    pub fn goto(target: EquatorialPosition) -> (Self, oneshot::Receiver<MountResult<()>>) {
        let (tx, rx) = oneshot::channel();
        (Self::Goto { target, response: tx }, rx)
    }

    pub fn sync(target: EquatorialPosition) -> (Self, oneshot::Receiver<MountResult<()>>) {
        let (tx, rx) = oneshot::channel();
        (Self::Sync { target, response: tx }, rx)
    }

    pub fn park() -> (Self, oneshot::Receiver<MountResult<()>>) {
        let (tx, rx) = oneshot::channel();
        (Self::Park { response: tx }, rx)
    }

    pub fn unpark() -> (Self, oneshot::Receiver<MountResult<()>>) {
        let (tx, rx) = oneshot::channel();
        (Self::Unpark { response: tx }, rx)
    }

    pub fn abort() -> (Self, oneshot::Receiver<MountResult<()>>) {
        let (tx, rx) = oneshot::channel();
        (Self::Abort { response: tx }, rx)
    }

    pub fn set_track_mode(mode: TrackMode) -> (Self, oneshot::Receiver<MountResult<()>>) {
        let (tx, rx) = oneshot::channel();
        (Self::SetTrackMode { mode, response: tx }, rx)
    }

    pub fn set_track_rate(rate: TrackRate) -> (Self, oneshot::Receiver<MountResult<()>>) {
        let (tx, rx) = oneshot::channel();
        (Self::SetTrackRate { rate, response: tx }, rx)
    }

    pub fn jog(direction: Direction, motion: Motion) -> (Self, oneshot::Receiver<MountResult<()>>) {
        let (tx, rx) = oneshot::channel();
        (
            Self::Jog {
                direction,
                motion,
                response: tx,
            },
            rx,
        )
    }

    pub fn pulse_guide(
        direction: Direction,
        duration: Duration,
    ) -> (Self, oneshot::Receiver<MountResult<()>>) {
        let (tx, rx) = oneshot::channel();
        (
            Self::PulseGuide {
                direction,
                duration,
                response: tx,
            },
            rx,
        )
    }

    pub fn set_rate(kind: RateKind, index: usize) -> (Self, oneshot::Receiver<MountResult<()>>) {
        let (tx, rx) = oneshot::channel();
        (
            Self::SetRate {
                kind,
                index,
                response: tx,
            },
            rx,
        )
    }

    pub fn set_sync_mode(mode: SyncMode) -> (Self, oneshot::Receiver<MountResult<()>>) {
        let (tx, rx) = oneshot::channel();
        (Self::SetSyncMode { mode, response: tx }, rx)
    }

    pub fn swap_buttons(
        north_south: bool,
        east_west: bool,
    ) -> (Self, oneshot::Receiver<MountResult<()>>) {
        let (tx, rx) = oneshot::channel();
        (
            Self::SwapButtons {
                north_south,
                east_west,
                response: tx,
            },
            rx,
        )
    }

    pub fn set_park_pose(
        request: ParkPoseRequest,
    ) -> (Self, oneshot::Receiver<MountResult<HorizontalPosition>>) {
        let (tx, rx) = oneshot::channel();
        (Self::SetParkPose { request, response: tx }, rx)
    }

    pub fn status() -> (Self, oneshot::Receiver<StatusReport>) {
        let (tx, rx) = oneshot::channel();
        (Self::GetStatus { response: tx }, rx)
    }

    pub fn refresh() -> (Self, oneshot::Receiver<MountResult<StatusReport>>) {
        let (tx, rx) = oneshot::channel();
        (Self::Refresh { response: tx }, rx)
    }

    pub fn shutdown() -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (Self::Shutdown { response: tx }, rx)
    }
}
