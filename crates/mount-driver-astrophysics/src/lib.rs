//! Astro-Physics GTO mount driver for rust-mount.
//!
//! This crate provides:
//! - [`codec::ApCodec`]: LX200 `#` frames with sexagesimal fields
//! - [`revision`]: controller revision and servo board detection from `:V#`
//! - [`AstroPhysicsMount`]: the [`mount_core::MountProtocol`] implementation
//! - [`sim::ApSimulator`]: an in-memory controller for tests and `simulate = true`
//!
//! # Usage
//!
//! Register the factory with your driver registry:
//!
//! ```rust,ignore
//! use mount_driver_astrophysics::AstroPhysicsFactory;
//!
//! registry.register_factory(AstroPhysicsFactory);
//! ```

pub mod codec;
pub mod driver;
pub mod revision;
pub mod sim;

pub use codec::ApCodec;
pub use driver::{ApParkMode, AstroPhysicsConfig, AstroPhysicsFactory, AstroPhysicsMount};
pub use revision::{parse_controller_revision, ControllerRevision, ServoBoard};
pub use sim::ApSimulator;

/// Force the linker to include this crate.
///
/// Call this function from main() to ensure the driver factory is linked
/// into the final binary and not stripped by the linker.
#[inline(never)]
pub fn link() {
    std::hint::black_box(std::any::TypeId::of::<AstroPhysicsFactory>());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_does_not_panic() {
        link();
    }
}
