/// Configuration for a tender
pub mod config;
/// The tender after boot info and module setup, ready to launch the guest
pub mod ready;
/// The tender with freshly mapped memory, waiting for the guest image
pub mod uninitialized;

pub use config::TenderConfiguration;
pub use ready::ReadyTender;
pub use uninitialized::{BootParams, UninitializedTender};
