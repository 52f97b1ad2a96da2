use crate::error::Result;
use kube::{Client, Config};

/// Create a new k8s client to interact with the k8s cluster api
///
/// Configuration is inferred from the environment: in-cluster service
/// account first, then the local kubeconfig.
///
/// # Errors
///
/// Will return `Err` if no usable cluster configuration can be inferred.
pub async fn new() -> Result<Client> {
    let config = Config::infer().await?;
    let client = Client::try_from(config)?;

    Ok(client)
}
