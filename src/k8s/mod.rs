pub mod client;
pub mod deployments;

pub use client::new as new_client;
pub use deployments::DeploymentSource;
