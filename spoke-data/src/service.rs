use std::sync::Arc;

use futures_core::future::BoxFuture;
use serde_json::Value;

use spoke_auth::TokenProvider;
use spoke_core::{DataConfig, EntityApi, EntityApiError, ModelKey};

/// REST client for entity CRUD and transition triggering.
///
/// Route shape: `/api/<modelName>` with the model version as a query
/// parameter, `.../{id}/transitions` for the workflow edges.
pub struct EntityService {
    client: reqwest::Client,
    base_url: String,
    auth: Arc<TokenProvider>,
}

impl EntityService {
    pub fn new(config: DataConfig, auth: Arc<TokenProvider>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            auth,
        }
    }

    fn collection_url(&self, model: &ModelKey) -> String {
        format!("{}/api/{}", self.base_url, model.name)
    }

    fn entity_url(&self, model: &ModelKey, id: &str) -> String {
        format!("{}/api/{}/{}", self.base_url, model.name, id)
    }

    async fn bearer(&self) -> Result<String, EntityApiError> {
        let token = self
            .auth
            .token()
            .await
            .map_err(|e| EntityApiError::Transport(format!("token acquisition failed: {e}")))?;
        Ok(token.secret().to_string())
    }

    async fn execute(&self, request: reqwest::RequestBuilder) -> Result<Value, EntityApiError> {
        let bearer = self.bearer().await?;
        let response = request
            .bearer_auth(bearer)
            .send()
            .await
            .map_err(|e| EntityApiError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::debug!(status = status.as_u16(), "Entity API call failed");
            return Err(EntityApiError::Status {
                code: status.as_u16(),
                message: body.chars().take(200).collect(),
            });
        }
        if status == reqwest::StatusCode::NO_CONTENT {
            return Ok(Value::Null);
        }
        response
            .json()
            .await
            .map_err(|e| EntityApiError::Decode(e.to_string()))
    }

    async fn get_impl(&self, model: &ModelKey, id: &str) -> Result<Value, EntityApiError> {
        self.execute(
            self.client
                .get(self.entity_url(model, id))
                .query(&[("modelVersion", model.version)]),
        )
        .await
    }

    async fn create_impl(&self, model: &ModelKey, payload: Value) -> Result<Value, EntityApiError> {
        self.execute(
            self.client
                .post(self.collection_url(model))
                .query(&[("modelVersion", model.version)])
                .json(&payload),
        )
        .await
    }

    async fn update_impl(
        &self,
        model: &ModelKey,
        id: &str,
        payload: Value,
        transition: Option<&str>,
    ) -> Result<Value, EntityApiError> {
        let mut request = self
            .client
            .put(self.entity_url(model, id))
            .query(&[("modelVersion", model.version)])
            .json(&payload);
        if let Some(transition) = transition {
            request = request.query(&[("transition", transition)]);
        }
        self.execute(request).await
    }

    async fn delete_impl(&self, model: &ModelKey, id: &str) -> Result<(), EntityApiError> {
        self.execute(
            self.client
                .delete(self.entity_url(model, id))
                .query(&[("modelVersion", model.version)]),
        )
        .await
        .map(|_| ())
    }

    async fn search_impl(
        &self,
        model: &ModelKey,
        query: Value,
    ) -> Result<Vec<Value>, EntityApiError> {
        let result = self
            .execute(
                self.client
                    .post(format!("{}/search", self.collection_url(model)))
                    .query(&[("modelVersion", model.version)])
                    .json(&query),
            )
            .await?;
        match result {
            Value::Array(items) => Ok(items),
            other => Err(EntityApiError::Decode(format!(
                "expected a JSON array of entities, got {other}"
            ))),
        }
    }

    async fn list_transitions_impl(
        &self,
        model: &ModelKey,
        id: &str,
    ) -> Result<Vec<String>, EntityApiError> {
        let result = self
            .execute(
                self.client
                    .get(format!("{}/transitions", self.entity_url(model, id)))
                    .query(&[("modelVersion", model.version)]),
            )
            .await?;
        serde_json::from_value(result).map_err(|e| EntityApiError::Decode(e.to_string()))
    }

    async fn trigger_transition_impl(
        &self,
        model: &ModelKey,
        id: &str,
        transition: &str,
    ) -> Result<Value, EntityApiError> {
        self.execute(
            self.client
                .post(format!(
                    "{}/transitions/{}",
                    self.entity_url(model, id),
                    transition
                ))
                .query(&[("modelVersion", model.version)]),
        )
        .await
    }
}

impl EntityApi for EntityService {
    fn get<'a>(
        &'a self,
        model: &'a ModelKey,
        id: &'a str,
    ) -> BoxFuture<'a, Result<Value, EntityApiError>> {
        Box::pin(self.get_impl(model, id))
    }

    fn create<'a>(
        &'a self,
        model: &'a ModelKey,
        payload: Value,
    ) -> BoxFuture<'a, Result<Value, EntityApiError>> {
        Box::pin(self.create_impl(model, payload))
    }

    fn update<'a>(
        &'a self,
        model: &'a ModelKey,
        id: &'a str,
        payload: Value,
        transition: Option<&'a str>,
    ) -> BoxFuture<'a, Result<Value, EntityApiError>> {
        Box::pin(self.update_impl(model, id, payload, transition))
    }

    fn delete<'a>(
        &'a self,
        model: &'a ModelKey,
        id: &'a str,
    ) -> BoxFuture<'a, Result<(), EntityApiError>> {
        Box::pin(self.delete_impl(model, id))
    }

    fn search<'a>(
        &'a self,
        model: &'a ModelKey,
        query: Value,
    ) -> BoxFuture<'a, Result<Vec<Value>, EntityApiError>> {
        Box::pin(self.search_impl(model, query))
    }

    fn list_transitions<'a>(
        &'a self,
        model: &'a ModelKey,
        id: &'a str,
    ) -> BoxFuture<'a, Result<Vec<String>, EntityApiError>> {
        Box::pin(self.list_transitions_impl(model, id))
    }

    fn trigger_transition<'a>(
        &'a self,
        model: &'a ModelKey,
        id: &'a str,
        transition: &'a str,
    ) -> BoxFuture<'a, Result<Value, EntityApiError>> {
        Box::pin(self.trigger_transition_impl(model, id, transition))
    }
}

impl std::fmt::Debug for EntityService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityService")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spoke_core::AuthConfig;

    fn service(base: &str) -> EntityService {
        EntityService::new(
            DataConfig {
                base_url: base.into(),
            },
            Arc::new(TokenProvider::new(AuthConfig::new(
                "id",
                "secret",
                "https://auth.example/token",
            ))),
        )
    }

    #[test]
    fn urls_are_namespaced_by_model() {
        let service = service("https://platform.example");
        let model = ModelKey::new("Item", 2);
        assert_eq!(
            service.collection_url(&model),
            "https://platform.example/api/Item"
        );
        assert_eq!(
            service.entity_url(&model, "t-1"),
            "https://platform.example/api/Item/t-1"
        );
    }

    #[test]
    fn trailing_slash_in_base_url_is_trimmed() {
        let service = service("https://platform.example/");
        let model = ModelKey::new("Item", 1);
        assert_eq!(
            service.collection_url(&model),
            "https://platform.example/api/Item"
        );
    }
}
