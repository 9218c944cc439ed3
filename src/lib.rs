//! # rust-mount
//!
//! Application layer of the rust-mount telescope mount controller. The
//! protocol and state-machine work lives in the workspace crates; this crate
//! wires them into a runnable service.
//!
//! ## Crate Structure
//!
//! - **`config`**: figment-based [`config::MountConfig`] (TOML file plus
//!   `RUST_MOUNT_` environment overrides) and its validation.
//! - **`drivers`**: registration of the Astro-Physics and PMC-Eight factories.
//! - **`messages`**: [`messages::MountCommand`], the request/response protocol
//!   of the service actor.
//! - **`service`**: [`service::MountService`], the task owning the
//!   [`mount_core::Mount`] state machine, and its [`service::MountHandle`].
//! - **`tracing_setup`**: `tracing-subscriber` initialisation from the config.

pub mod config;
pub mod drivers;
pub mod messages;
pub mod service;
pub mod tracing_setup;

pub use config::MountConfig;
pub use messages::{MountCommand, ParkPoseRequest};
pub use service::{MountHandle, MountService};
