use crate::error::{ControllerError, Result};
use crate::traits::ClusterClient;
use async_trait::async_trait;
use devbox_core::labels::selector_string;
use devbox_core::{Devbox, Labels, Resource};
use k8s_openapi::api::core::v1::{Event, Pod, Secret, Service};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::DeleteOptions;
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use tracing::debug;

/// HTTP client for a Kubernetes-compatible API server
pub struct ApiClient {
    base_url: String,
    token: Option<String>,
    client: Client,
}

/// Envelope of a list response; only `items` is read
#[derive(Debug, Deserialize)]
struct ObjectList<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token: None,
            client: Client::new(),
        }
    }

    /// Authenticate every request with a bearer token
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send(&self, builder: reqwest::RequestBuilder) -> Result<Response> {
        self.authorize(builder)
            .send()
            .await
            .map_err(|e| ControllerError::http_error(e.to_string()))
    }

    /// Map a non-2xx response onto a typed error
    async fn status_error(resp: Response, operation: &str, kind: &str, key: &str) -> ControllerError {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();

        match status {
            StatusCode::NOT_FOUND => ControllerError::not_found(kind, key),
            StatusCode::CONFLICT if body.contains("AlreadyExists") => {
                ControllerError::already_exists(kind, key)
            }
            StatusCode::CONFLICT => ControllerError::conflict(kind, key),
            StatusCode::FORBIDDEN | StatusCode::UNPROCESSABLE_ENTITY
                if body.contains("exceeded quota") =>
            {
                ControllerError::quota_exceeded(kind, key, body)
            }
            _ => ControllerError::api_error(operation, status.as_u16(), body),
        }
    }

    async fn parse<T: for<'de> Deserialize<'de>>(resp: Response, kind: &str) -> Result<T> {
        resp.json::<T>().await.map_err(|e| {
            ControllerError::internal_error(format!("Failed to parse {}: {}", kind, e))
        })
    }

    async fn get<T: Resource>(&self, namespace: &str, name: &str) -> Result<T> {
        let gvk = T::gvk();
        let url = self.url(&gvk.object_path(namespace, name));
        debug!("GET {}", url);

        let resp = self.send(self.client.get(&url)).await?;
        if !resp.status().is_success() {
            let key = format!("{}/{}", namespace, name);
            return Err(Self::status_error(resp, "GET", &gvk.kind, &key).await);
        }
        Self::parse(resp, &gvk.kind).await
    }

    async fn list<T: Resource>(&self, path: &str, selector: Option<&Labels>) -> Result<Vec<T>> {
        let gvk = T::gvk();
        let url = self.url(path);
        debug!("LIST {}", url);

        let mut builder = self.client.get(&url);
        if let Some(selector) = selector {
            builder = builder.query(&[("labelSelector", selector_string(selector))]);
        }

        let resp = self.send(builder).await?;
        if !resp.status().is_success() {
            return Err(Self::status_error(resp, "LIST", &gvk.kind, path).await);
        }
        let list: ObjectList<T> = Self::parse(resp, &gvk.kind).await?;
        Ok(list.items)
    }

    async fn create<T: Resource>(&self, object: &T) -> Result<T> {
        let gvk = T::gvk();
        let url = self.url(&gvk.collection_path(object.namespace()));
        debug!("POST {}", url);

        let resp = self.send(self.client.post(&url).json(object)).await?;
        if !resp.status().is_success() {
            let key = object.object_key().to_string();
            return Err(Self::status_error(resp, "POST", &gvk.kind, &key).await);
        }
        Self::parse(resp, &gvk.kind).await
    }

    async fn replace<T: Resource>(&self, object: &T, subresource: Option<&str>) -> Result<T> {
        let gvk = T::gvk();
        let mut path = gvk.object_path(object.namespace(), object.name());
        if let Some(sub) = subresource {
            path = format!("{}/{}", path, sub);
        }
        let url = self.url(&path);
        debug!("PUT {}", url);

        let resp = self.send(self.client.put(&url).json(object)).await?;
        if !resp.status().is_success() {
            let key = object.object_key().to_string();
            return Err(Self::status_error(resp, "PUT", &gvk.kind, &key).await);
        }
        Self::parse(resp, &gvk.kind).await
    }

    async fn delete<T: Resource>(
        &self,
        namespace: &str,
        name: &str,
        options: &DeleteOptions,
    ) -> Result<()> {
        let gvk = T::gvk();
        let url = self.url(&gvk.object_path(namespace, name));
        debug!("DELETE {}", url);

        let resp = self.send(self.client.delete(&url).json(options)).await?;
        if !resp.status().is_success() {
            let key = format!("{}/{}", namespace, name);
            return Err(Self::status_error(resp, "DELETE", &gvk.kind, &key).await);
        }
        Ok(())
    }
}

#[async_trait]
impl ClusterClient for ApiClient {
    async fn get_devbox(&self, namespace: &str, name: &str) -> Result<Devbox> {
        self.get(namespace, name).await
    }

    async fn list_devboxes(&self) -> Result<Vec<Devbox>> {
        let gvk = <Devbox as Resource>::gvk();
        let path = format!("/{}/{}", gvk.api_path(), gvk.resource_name());
        self.list(&path, None).await
    }

    async fn update_devbox(&self, devbox: &Devbox) -> Result<Devbox> {
        self.replace(devbox, None).await
    }

    async fn update_devbox_status(&self, devbox: &Devbox) -> Result<Devbox> {
        self.replace(devbox, Some("status")).await
    }

    async fn list_pods(&self, namespace: &str, selector: &Labels) -> Result<Vec<Pod>> {
        let path = <Pod as Resource>::gvk().collection_path(namespace);
        self.list(&path, Some(selector)).await
    }

    async fn create_pod(&self, pod: &Pod) -> Result<Pod> {
        self.create(pod).await
    }

    async fn update_pod(&self, pod: &Pod) -> Result<Pod> {
        self.replace(pod, None).await
    }

    async fn delete_pod(&self, namespace: &str, name: &str, options: &DeleteOptions) -> Result<()> {
        self.delete::<Pod>(namespace, name, options).await
    }

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Service> {
        self.get(namespace, name).await
    }

    async fn list_services(&self, namespace: &str, selector: &Labels) -> Result<Vec<Service>> {
        let path = <Service as Resource>::gvk().collection_path(namespace);
        self.list(&path, Some(selector)).await
    }

    async fn create_service(&self, service: &Service) -> Result<Service> {
        self.create(service).await
    }

    async fn update_service(&self, service: &Service) -> Result<Service> {
        self.replace(service, None).await
    }

    async fn delete_service(&self, namespace: &str, name: &str) -> Result<()> {
        self.delete::<Service>(namespace, name, &DeleteOptions::default())
            .await
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Secret> {
        self.get(namespace, name).await
    }

    async fn list_secrets(&self, namespace: &str, selector: &Labels) -> Result<Vec<Secret>> {
        let path = <Secret as Resource>::gvk().collection_path(namespace);
        self.list(&path, Some(selector)).await
    }

    async fn create_secret(&self, secret: &Secret) -> Result<Secret> {
        self.create(secret).await
    }

    async fn update_secret(&self, secret: &Secret) -> Result<Secret> {
        self.replace(secret, None).await
    }

    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<()> {
        self.delete::<Secret>(namespace, name, &DeleteOptions::default())
            .await
    }

    async fn create_event(&self, event: &Event) -> Result<()> {
        let namespace = event.metadata.namespace.as_deref().unwrap_or("default");
        let url = self.url(&format!("/api/v1/namespaces/{}/events", namespace));
        debug!("POST {}", url);

        let resp = self.send(self.client.post(&url).json(event)).await?;
        if !resp.status().is_success() {
            let name = event.metadata.name.as_deref().unwrap_or_default();
            let key = format!("{}/{}", namespace, name);
            return Err(Self::status_error(resp, "POST", "Event", &key).await);
        }
        Ok(())
    }
}
