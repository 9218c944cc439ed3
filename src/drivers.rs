//! Driver registration for the rust-mount binary.
//!
//! Call [`registry`] to obtain a [`DriverRegistry`] holding every linked
//! dialect. The `[device] driver` key of the configuration selects one:
//!
//! | Driver type    | Controller                          | Crate                       |
//! |----------------|-------------------------------------|-----------------------------|
//! | `astrophysics` | Astro-Physics GTO (LX200 `#` frames) | `mount-driver-astrophysics` |
//! | `pmc8`         | Explore Scientific PMC-Eight (`!`)  | `mount-driver-pmc8`         |

use mount_core::driver::DriverRegistry;
use mount_driver_astrophysics::AstroPhysicsFactory;
use mount_driver_pmc8::Pmc8Factory;

/// Force the linker to include all driver crates.
#[inline(never)]
pub fn link_drivers() {
    mount_driver_astrophysics::link();
    mount_driver_pmc8::link();
}

/// Registry with every driver factory registered.
pub fn registry() -> DriverRegistry {
    link_drivers();
    let mut registry = DriverRegistry::new();
    registry.register_factory(AstroPhysicsFactory);
    registry.register_factory(Pmc8Factory);
    registry
}

/// Driver types accepted in `[device] driver`.
pub fn available_drivers() -> Vec<&'static str> {
    registry().driver_types()
}
