use std::sync::Arc;

use object_store::{aws::AmazonS3Builder, ClientOptions, ObjectStore};

use ncarray_storage::{
    config::{Config, ConfigError, EndpointConfig},
    registry::BackendPlugin,
    StorageBackend, StorageError,
};

use crate::{ObjectLocation, ObjectStoreBackend, ObjectStoreConnector};

inventory::submit! {
    BackendPlugin::new(is_kind_s3, create_backend_s3)
}

fn is_kind_s3(kind: &str) -> bool {
    kind == "s3"
}

fn create_backend_s3(uri: &str, config: &Config) -> Result<StorageBackend, StorageError> {
    let (alias, endpoint) = config
        .endpoint_for(uri)
        .ok_or_else(|| ConfigError::MissingEndpoint(uri.to_string()))?;
    log::debug!("s3 endpoint {alias} at {}", endpoint.url);
    let options = config.backend_options("s3");
    let connector = s3_connector(endpoint.clone(), options.connect_timeout(), options.read_timeout());
    Ok(Arc::new(ObjectStoreBackend::new("s3", options, connector)?))
}

/// Create a connector which builds an S3 client for each bucket of `endpoint`.
#[must_use]
pub fn s3_connector(
    endpoint: EndpointConfig,
    connect_timeout: std::time::Duration,
    read_timeout: std::time::Duration,
) -> ObjectStoreConnector {
    Arc::new(move |location: &ObjectLocation| {
        let client_options = ClientOptions::new()
            .with_connect_timeout(connect_timeout)
            .with_timeout(read_timeout)
            .with_allow_http(endpoint.url.starts_with("http://"));
        let mut builder = AmazonS3Builder::new()
            .with_endpoint(&endpoint.url)
            .with_bucket_name(&location.bucket)
            .with_region(endpoint.region.as_deref().unwrap_or("us-east-1"))
            .with_virtual_hosted_style_request(false)
            .with_client_options(client_options);
        if let Some(credentials) = &endpoint.credentials {
            builder = builder
                .with_access_key_id(&credentials.access_key)
                .with_secret_access_key(&credentials.secret_key);
        }
        let store: Arc<dyn ObjectStore> =
            Arc::new(builder.build().map_err(|err| StorageError::ConnectionError {
                uri: location.endpoint.clone(),
                reason: err.to_string(),
            })?);
        Ok(store)
    })
}
