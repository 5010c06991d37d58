//! JSON-over-HTTP registry transport.
//!
//! Every call is a `POST {server}/v1/<method>` with a JSON body from
//! [`crate::wire`]. Connection failures and 5xx answers are `Unreachable`;
//! 404 and 409 carry an [`ErrorBody`] naming the precise failure.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::client::RegistryClient;
use crate::error::{RegistryError, Result};
use crate::integrity::ContentHash;
use crate::name::PackageName;
use crate::snapshot::PackageSnapshot;
use crate::wire::{
    ErrorBody, ErrorCode, FetchRequest, FetchResponse, ListRequest, ListResponse, PublishReceipt,
    PublishRequest, ResolveRequest, ResolveResponse,
};

/// A registry reached over HTTP.
#[derive(Debug, Clone)]
pub struct HttpRegistry {
    server: String,
    client: reqwest::Client,
}

impl HttpRegistry {
    /// Create a client for `server` with a per-request timeout.
    pub fn new(server: &str, timeout: Duration) -> Result<Self> {
        let server = server.trim_end_matches('/').to_string();
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RegistryError::unreachable(&server, e.to_string()))?;
        Ok(HttpRegistry { server, client })
    }

    async fn call<Req, Resp>(&self, method: &str, subject: &str, body: &Req) -> Result<Resp>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned + Send,
    {
        let url = format!("{}/v1/{method}", self.server);
        debug!(%url, subject, "registry call");

        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| RegistryError::unreachable(&self.server, e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return response
                .json::<Resp>()
                .await
                .map_err(|e| RegistryError::unreachable(&self.server, format!("bad response: {e}")));
        }

        let error_body = response.json::<ErrorBody>().await.ok();
        Err(status_error(&self.server, status.as_u16(), error_body, subject))
    }
}

/// Map a non-success status (and optional error body) to a registry error.
fn status_error(server: &str, status: u16, body: Option<ErrorBody>, subject: &str) -> RegistryError {
    match (status, body) {
        (404 | 409 | 422, Some(body)) => body.into_error(subject),
        (404, None) => RegistryError::NotFound {
            name: subject.to_string(),
        },
        (409 | 422, None) => RegistryError::Rejected {
            name: subject.to_string(),
            reason: format!("HTTP {status}"),
        },
        (_, Some(body)) if body.code == ErrorCode::Rejected && status < 500 => {
            body.into_error(subject)
        }
        (status, _) => RegistryError::unreachable(server, format!("HTTP {status}")),
    }
}

#[async_trait]
impl RegistryClient for HttpRegistry {
    fn server(&self) -> &str {
        &self.server
    }

    async fn publish(&self, snapshot: &PackageSnapshot) -> Result<PublishReceipt> {
        let request = PublishRequest::from(snapshot);
        self.call("publish", snapshot.name().as_str(), &request).await
    }

    async fn fetch(
        &self,
        name: &PackageName,
        want: Option<&ContentHash>,
    ) -> Result<PackageSnapshot> {
        let request = FetchRequest {
            name: name.clone(),
            want_digest: want.cloned(),
        };
        let response: FetchResponse = self.call("fetch", name.as_str(), &request).await?;
        if &response.name != name {
            return Err(RegistryError::unreachable(
                &self.server,
                format!("asked for '{name}', registry answered '{}'", response.name),
            ));
        }
        if let Some(want) = want {
            if &response.digest != want {
                return Err(RegistryError::DigestMismatch {
                    name: name.to_string(),
                    expected: want.to_string(),
                    actual: response.digest.to_string(),
                });
            }
        }
        PackageSnapshot::try_from(response)
    }

    async fn resolve(&self, names: &[PackageName]) -> Result<BTreeMap<PackageName, ContentHash>> {
        let request = ResolveRequest {
            names: names.to_vec(),
        };
        let subject = names
            .first()
            .map(|n| n.as_str().to_string())
            .unwrap_or_default();
        let response: ResolveResponse = self.call("resolve", &subject, &request).await?;
        if let Some(missing) = names.iter().find(|n| !response.digests.contains_key(*n)) {
            return Err(RegistryError::NotFound {
                name: missing.to_string(),
            });
        }
        Ok(response.digests)
    }

    async fn list(&self, prefix: &str) -> Result<Vec<PackageName>> {
        let request = ListRequest {
            prefix: prefix.to_string(),
        };
        let response: ListResponse = self.call("list", prefix, &request).await?;
        Ok(response.names)
    }
}
