//! HTTP implementation of the provisioning backend.
//!
//! Talks JSON to a provisioning service laid out as:
//!
//! | Operation | Request |
//! |-----------|---------|
//! | create volume | `POST {endpoint}/volumes` |
//! | delete volume | `DELETE {endpoint}/volumes/{volume_id}` |
//! | attach volume | `POST {endpoint}/volumes/{volume_id}/attachments` |
//! | detach volume | `DELETE {endpoint}/volumes/{volume_id}/attachments/{instance_id}` |
//! | bind address | `PUT {endpoint}/addresses/{address}/binding` |
//!
//! Any 2xx status is success. Requests carry `X-Auth-Token` when a token is
//! configured.

use std::net::IpAddr;
use std::time::Duration;

use reqwest::{Client, RequestBuilder};
use serde::Serialize;
use tracing::debug;

use crate::backend::{Backend, BackendFuture, ProvisionOperation};
use crate::config::ProvisionerConfig;
use crate::volume::{AttachedVolume, StorageVolumeRequest, VolumeBackend};

mod error;

pub use error::HttpProvisionerError;

const AUTH_HEADER: &str = "X-Auth-Token";

#[derive(Debug, Serialize)]
struct AttachmentPayload<'a> {
    instance_id: &'a str,
    device: &'a str,
}

#[derive(Debug, Serialize)]
struct BindingPayload<'a> {
    instance_id: &'a str,
}

/// Provisioning backend reached over HTTP.
#[derive(Clone, Debug)]
pub struct HttpProvisioner {
    client: Client,
    endpoint: String,
    auth_token: Option<String>,
    timeout: Duration,
}

impl HttpProvisioner {
    /// Builds a provisioner from validated configuration.
    ///
    /// # Errors
    ///
    /// Returns [`HttpProvisionerError::Config`] when validation fails or the
    /// HTTP client cannot be built.
    pub fn new(config: &ProvisionerConfig) -> Result<Self, HttpProvisionerError> {
        config.validate()?;
        let timeout = config.request_timeout();
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| HttpProvisionerError::Config(err.to_string()))?;
        Ok(Self {
            client,
            endpoint: config.endpoint.trim().trim_end_matches('/').to_owned(),
            auth_token: config.auth_token.clone(),
            timeout,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.endpoint, path.trim_start_matches('/'))
    }

    fn authorised(&self, request: RequestBuilder) -> RequestBuilder {
        let timed = request.timeout(self.timeout);
        match &self.auth_token {
            Some(token) => timed.header(AUTH_HEADER, token),
            None => timed,
        }
    }

    async fn send(
        &self,
        operation: ProvisionOperation,
        resource: &str,
        request: RequestBuilder,
    ) -> Result<(), HttpProvisionerError> {
        debug!(%operation, resource, "dispatching provisioning request");
        let response = self.authorised(request).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let message = response.text().await.unwrap_or_default();
        Err(HttpProvisionerError::Rejected {
            operation,
            resource: resource.to_owned(),
            status: status.as_u16(),
            message,
        })
    }
}

impl Backend for HttpProvisioner {
    type Error = HttpProvisionerError;

    fn bind_address<'a>(
        &'a self,
        address: IpAddr,
        instance_id: &'a str,
    ) -> BackendFuture<'a, (), Self::Error> {
        Box::pin(async move {
            let request = self
                .client
                .put(self.url(&format!("addresses/{address}/binding")))
                .json(&BindingPayload { instance_id });
            self.send(
                ProvisionOperation::BindAddress,
                &address.to_string(),
                request,
            )
            .await
        })
    }
}

impl VolumeBackend for HttpProvisioner {
    fn create_volume<'a>(
        &'a self,
        request: &'a StorageVolumeRequest,
    ) -> BackendFuture<'a, (), Self::Error> {
        Box::pin(async move {
            let http = self.client.post(self.url("volumes")).json(request);
            self.send(ProvisionOperation::CreateVolume, &request.volume_id, http)
                .await
        })
    }

    fn delete_volume<'a>(&'a self, volume_id: &'a str) -> BackendFuture<'a, (), Self::Error> {
        Box::pin(async move {
            let http = self.client.delete(self.url(&format!("volumes/{volume_id}")));
            self.send(ProvisionOperation::DeleteVolume, volume_id, http)
                .await
        })
    }

    fn attach_volume<'a>(
        &'a self,
        attachment: &'a AttachedVolume,
    ) -> BackendFuture<'a, (), Self::Error> {
        Box::pin(async move {
            let http = self
                .client
                .post(self.url(&format!("volumes/{}/attachments", attachment.volume_id)))
                .json(&AttachmentPayload {
                    instance_id: &attachment.instance_id,
                    device: &attachment.device,
                });
            self.send(
                ProvisionOperation::AttachVolume,
                &attachment.volume_id,
                http,
            )
            .await
        })
    }

    fn detach_volume<'a>(
        &'a self,
        attachment: &'a AttachedVolume,
    ) -> BackendFuture<'a, (), Self::Error> {
        Box::pin(async move {
            let http = self.client.delete(self.url(&format!(
                "volumes/{}/attachments/{}",
                attachment.volume_id, attachment.instance_id
            )));
            self.send(
                ProvisionOperation::DetachVolume,
                &attachment.volume_id,
                http,
            )
            .await
        })
    }
}
