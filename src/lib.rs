pub mod bus;
pub mod cli;
pub mod config;
pub mod error;
pub mod hub;
pub mod logging;
pub mod pegging;
pub mod prediction;
pub mod reliability;
pub mod secure_store;
pub mod sensors;
pub mod training;
pub mod types;

pub use error::{HubError, HubErrorKind};
pub use hub::{Hub, HubDependencies, HubPhase, HubStatus, ShutdownReport};
