//! Registry client factory keyed on host suffix

use super::http::{is_docker_hub, Endpoint, HttpClient};
use super::{AcrRegistry, DockerRegistry, EcrRegistry, GcrRegistry, Registry, RegistryFamily};
use crate::config::Config;
use crate::credentials::DockerConfigStore;
use crate::error::KilnResult;
use tracing::debug;

/// Create the registry client for `host`
pub fn create_registry(host: &str, config: &Config) -> KilnResult<Box<dyn Registry>> {
    let family = RegistryFamily::detect(host);
    let insecure = &config.network.insecure_registries;
    debug!("Registry {} detected as {}", host, family);

    let registry: Box<dyn Registry> = match family {
        RegistryFamily::Gcr => Box::new(GcrRegistry::new(
            host,
            Endpoint::v2(host, insecure),
            HttpClient::new(&config.network)?,
            config.credentials.gcp.clone(),
        )),
        RegistryFamily::Ecr => Box::new(EcrRegistry::new(host)),
        RegistryFamily::Acr => Box::new(AcrRegistry::new(
            host,
            Endpoint::acr(host, insecure),
            HttpClient::new(&config.network)?,
            config.credentials.azure.clone(),
        )),
        RegistryFamily::GenericV2 => {
            let endpoint = if is_docker_hub(host) {
                Endpoint::docker_hub()
            } else {
                Endpoint::v2(host, insecure)
            };
            Box::new(DockerRegistry::new(
                host,
                endpoint,
                HttpClient::new(&config.network)?,
                DockerConfigStore::from_config(config.credentials.docker.config_path.as_deref()),
            ))
        }
    };

    Ok(registry)
}
