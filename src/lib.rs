pub mod error;
pub mod k8s;
pub mod pipeline;
pub mod server;

pub use error::{Error, Result};
