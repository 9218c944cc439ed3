//! Explore Scientific PMC-Eight mount driver for rust-mount.
//!
//! This crate provides:
//! - [`codec::Pmc8Codec`]: `ES...!` frames with two's-complement hex counts
//! - [`Pmc8Mount`]: the [`mount_core::MountProtocol`] implementation
//! - [`sim::Pmc8Simulator`]: an in-memory board for tests and `simulate = true`
//!
//! # Usage
//!
//! ```rust,ignore
//! use mount_driver_pmc8::Pmc8Factory;
//!
//! registry.register_factory(Pmc8Factory);
//! ```

pub mod codec;
pub mod driver;
pub mod sim;

pub use codec::{hex_decode, hex_encode, Pmc8Codec};
pub use driver::{Pmc8Config, Pmc8Factory, Pmc8Mount};
pub use sim::Pmc8Simulator;

/// Force the linker to include this crate.
///
/// Call this function from main() to ensure the driver factory is linked
/// into the final binary and not stripped by the linker.
#[inline(never)]
pub fn link() {
    std::hint::black_box(std::any::TypeId::of::<Pmc8Factory>());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_does_not_panic() {
        link();
    }
}
