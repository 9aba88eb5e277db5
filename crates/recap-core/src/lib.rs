pub mod config;
pub mod error;
pub mod registry;
pub mod types;

pub use config::RecapConfig;
pub use error::{RecapError, Result, ValidationError};
pub use registry::{EventTypeDescriptor, EventTypeRegistry};
pub use types::*;
