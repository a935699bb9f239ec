pub mod bootstrap;
pub mod host;
pub mod staging;

pub use bootstrap::{BootstrapParams, BootstrapScript, BootstrapStep};
pub use staging::StagingArea;
