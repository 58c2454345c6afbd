//! reqwest implementation of the remote gateway

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, Url};
use serde_json::{json, Value};
use tracing::debug;

use crate::config::EndpointsConfig;

use super::{DeletePayload, GatewayError, RemoteGateway, RenamePayload, SavePayload};

pub struct HttpGateway {
    client: Client,
    endpoints: EndpointsConfig,
}

impl HttpGateway {
    pub fn new(endpoints: EndpointsConfig) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(endpoints.timeout_secs))
            .build()?;

        Ok(Self { client, endpoints })
    }

    fn conversations_url(&self) -> Result<Url, GatewayError> {
        parse_url(&self.endpoints.conversations_url)
    }

    fn save_url(&self) -> Result<Url, GatewayError> {
        parse_url(&self.endpoints.save_url)
    }
}

#[async_trait]
impl RemoteGateway for HttpGateway {
    async fn list_conversations(&self, title_filter: &str) -> Result<Value, GatewayError> {
        let mut url = self.conversations_url()?;
        if !title_filter.is_empty() {
            url.query_pairs_mut().append_pair("title", title_filter);
        }

        // the API also reads the filter from a JSON body on GET
        let response = self
            .client
            .get(url)
            .json(&json!({ "title": title_filter }))
            .send()
            .await?;

        read_json(response).await
    }

    async fn get_conversation(&self, id: &str) -> Result<Option<Value>, GatewayError> {
        let base = self.conversations_url()?;
        let mut last_error = None;

        for strategy in &self.endpoints.fetch_strategies {
            let Some(url) = strategy.url(&base, id) else {
                continue;
            };

            debug!(?strategy, %url, "Probing conversation endpoint");

            let outcome = match self.client.get(url).send().await {
                Ok(response) => read_json(response).await,
                Err(e) => Err(e.into()),
            };

            match outcome {
                Ok(payload) if is_usable(&payload) => return Ok(Some(payload)),
                Ok(_) => debug!(?strategy, "Endpoint answered without a conversation"),
                Err(e) => {
                    debug!(?strategy, error = %e, "Endpoint candidate failed");
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) => Err(e),
            None => Ok(None),
        }
    }

    async fn upsert_turn(&self, payload: &SavePayload) -> Result<Value, GatewayError> {
        let response = self
            .client
            .post(self.save_url()?)
            .json(payload)
            .send()
            .await?;

        read_json(response).await
    }

    async fn rename(&self, payload: &RenamePayload) -> Result<Value, GatewayError> {
        let response = self
            .client
            .put(self.save_url()?)
            .json(payload)
            .send()
            .await?;

        read_json(response).await
    }

    async fn delete(&self, payload: &DeletePayload) -> Result<Value, GatewayError> {
        let response = self
            .client
            .delete(self.save_url()?)
            .json(payload)
            .send()
            .await?;

        read_json(response).await
    }
}

fn parse_url(raw: &str) -> Result<Url, GatewayError> {
    Url::parse(raw).map_err(|e| GatewayError::InvalidUrl(format!("{}: {}", raw, e)))
}

/// Check the status, then parse the body as JSON
async fn read_json(response: Response) -> Result<Value, GatewayError> {
    let status = response.status();
    let body = response.text().await?;

    if !status.is_success() {
        return Err(GatewayError::Server {
            status: status.as_u16(),
            body,
        });
    }

    serde_json::from_str(&body)
        .map_err(|e| GatewayError::Parse(format!("{} - Body: {}", e, body)))
}

fn is_usable(payload: &Value) -> bool {
    match payload {
        Value::Null | Value::Bool(false) => false,
        Value::Array(items) => !items.is_empty(),
        _ => true,
    }
}
