//! HTTP-backed collaborators.
//!
//! All endpoints live under one base URL:
//!
//! | Call | Request | Response |
//! |---|---|---|
//! | identity | `GET /identities/{externalId}` | `{subjectId, displayAttrs}`, 404 = not found |
//! | instructions | `GET /subjects/{subjectId}/instructions` | `{instructions}` |
//! | tool | `POST /tools/{name}` `{subjectId, args}` | `{result}` or `{error}` |
//! | insight | `POST /subjects/{subjectId}/insights` `{transcript}` | `{insight?}` |

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;
use url::Url;

use super::{CollaboratorError, Identity, IdentityResolver, InsightSource, InstructionBuilder};
use crate::core::tools::{Tool, ToolContext, ToolError};
use crate::core::upstream::ToolDeclaration;

/// Client for the collaborator service.
#[derive(Debug, Clone)]
pub struct HttpCollaborator {
    base_url: Url,
    client: Client,
}

#[derive(Deserialize)]
struct InstructionsResponse {
    instructions: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ToolRequest<'a> {
    subject_id: &'a str,
    args: &'a Map<String, Value>,
}

#[derive(Deserialize)]
struct ToolResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Serialize)]
struct InsightRequest<'a> {
    transcript: &'a str,
}

#[derive(Deserialize)]
struct InsightResponse {
    #[serde(default)]
    insight: Option<String>,
}

impl HttpCollaborator {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, CollaboratorError> {
        let base_url = Url::parse(base_url).map_err(|e| {
            CollaboratorError::Unavailable(format!("Invalid collaborator URL {base_url}: {e}"))
        })?;
        if base_url.cannot_be_a_base() {
            return Err(CollaboratorError::Unavailable(format!(
                "Collaborator URL cannot be a base: {base_url}"
            )));
        }

        let client = Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(8)
            .build()
            .map_err(|e| {
                CollaboratorError::Unavailable(format!("Failed to create HTTP client: {e}"))
            })?;

        Ok(Self { base_url, client })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Base URL with `segments` appended, each percent-encoded.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, CollaboratorError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| {
                CollaboratorError::Unavailable(format!(
                    "Collaborator URL cannot be a base: {}",
                    self.base_url
                ))
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn decode<T: DeserializeOwned>(
        url: &Url,
        response: reqwest::Response,
    ) -> Result<T, CollaboratorError> {
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(CollaboratorError::NotFound(url.path().to_string()));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CollaboratorError::Unavailable(format!(
                "{} returned {status}: {body}",
                url.path()
            )));
        }
        response
            .json::<T>()
            .await
            .map_err(|e| CollaboratorError::InvalidResponse(format!("{}: {e}", url.path())))
    }

    async fn get<T: DeserializeOwned>(&self, segments: &[&str]) -> Result<T, CollaboratorError> {
        let url = self.endpoint(segments)?;
        debug!(url = %url, "Collaborator GET");
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| CollaboratorError::Unavailable(e.to_string()))?;
        Self::decode(&url, response).await
    }

    async fn post<B: Serialize, T: DeserializeOwned>(
        &self,
        segments: &[&str],
        body: &B,
    ) -> Result<T, CollaboratorError> {
        let url = self.endpoint(segments)?;
        debug!(url = %url, "Collaborator POST");
        let response = self
            .client
            .post(url.clone())
            .json(body)
            .send()
            .await
            .map_err(|e| CollaboratorError::Unavailable(e.to_string()))?;
        Self::decode(&url, response).await
    }

    /// Invoke a remote tool. A `{error}` body is a tool failure, not a
    /// transport failure.
    pub async fn call_tool(
        &self,
        name: &str,
        subject_id: &str,
        args: &Map<String, Value>,
    ) -> Result<Map<String, Value>, ToolError> {
        let response: ToolResponse = self
            .post(&["tools", name], &ToolRequest { subject_id, args })
            .await
            .map_err(|e| ToolError::Failed(e.to_string()))?;

        if let Some(error) = response.error {
            return Err(ToolError::Failed(error));
        }
        match response.result {
            Some(Value::Object(map)) => Ok(map),
            Some(Value::Null) | None => Ok(Map::new()),
            Some(other) => {
                let mut map = Map::new();
                map.insert("value".to_string(), other);
                Ok(map)
            }
        }
    }
}

#[async_trait]
impl IdentityResolver for HttpCollaborator {
    async fn resolve(&self, external_id: &str) -> Result<Identity, CollaboratorError> {
        match self.get::<Identity>(&["identities", external_id]).await {
            Err(CollaboratorError::NotFound(_)) => {
                Err(CollaboratorError::NotFound(external_id.to_string()))
            }
            other => other,
        }
    }
}

#[async_trait]
impl InstructionBuilder for HttpCollaborator {
    async fn build(&self, subject_id: &str) -> Result<String, CollaboratorError> {
        let response: InstructionsResponse =
            self.get(&["subjects", subject_id, "instructions"]).await?;
        Ok(response.instructions)
    }
}

#[async_trait]
impl InsightSource for HttpCollaborator {
    async fn insight(
        &self,
        subject_id: &str,
        transcript: &str,
    ) -> Result<Option<String>, CollaboratorError> {
        let response: InsightResponse = self
            .post(
                &["subjects", subject_id, "insights"],
                &InsightRequest { transcript },
            )
            .await?;
        Ok(response.insight.filter(|s| !s.trim().is_empty()))
    }
}

/// A tool whose implementation lives in the collaborator service.
pub struct RemoteTool {
    client: Arc<HttpCollaborator>,
    declaration: ToolDeclaration,
}

impl RemoteTool {
    pub fn new(client: Arc<HttpCollaborator>, declaration: ToolDeclaration) -> Self {
        Self {
            client,
            declaration,
        }
    }
}

#[async_trait]
impl Tool for RemoteTool {
    fn declaration(&self) -> ToolDeclaration {
        self.declaration.clone()
    }

    async fn invoke(
        &self,
        ctx: ToolContext,
        args: Map<String, Value>,
    ) -> Result<Map<String, Value>, ToolError> {
        self.client
            .call_tool(&self.declaration.name, &ctx.subject_id, &args)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn collaborator(server: &MockServer) -> Arc<HttpCollaborator> {
        Arc::new(HttpCollaborator::new(&server.uri(), Duration::from_secs(2)).unwrap())
    }

    #[tokio::test]
    async fn test_resolve_identity() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/identities/c1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "subjectId": "subject-1",
                "displayAttrs": {"name": "Ada"}
            })))
            .mount(&server)
            .await;

        let identity = collaborator(&server).resolve("c1").await.unwrap();
        assert_eq!(identity.subject_id, "subject-1");
        assert_eq!(identity.display_attrs["name"], "Ada");
    }

    #[tokio::test]
    async fn test_resolve_identity_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/identities/ghost"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let err = collaborator(&server).resolve("ghost").await.unwrap_err();
        assert_eq!(err, CollaboratorError::NotFound("ghost".to_string()));
    }

    #[tokio::test]
    async fn test_server_error_is_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/subjects/s/instructions"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let err = collaborator(&server).build("s").await.unwrap_err();
        assert!(matches!(err, CollaboratorError::Unavailable(ref m) if m.contains("boom")));
    }

    #[tokio::test]
    async fn test_build_instructions() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/subjects/subject-1/instructions"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"instructions": "Be kind."})),
            )
            .mount(&server)
            .await;

        assert_eq!(
            collaborator(&server).build("subject-1").await.unwrap(),
            "Be kind."
        );
    }

    #[tokio::test]
    async fn test_malformed_body_is_invalid_response() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/subjects/subject-1/instructions"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        assert!(matches!(
            collaborator(&server).build("subject-1").await,
            Err(CollaboratorError::InvalidResponse(_))
        ));
    }

    #[tokio::test]
    async fn test_insight() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/subjects/subject-1/insights"))
            .and(body_json(json!({"transcript": "I feel tired"})))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"insight": "User slept badly"})),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/subjects/subject-2/insights"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .mount(&server)
            .await;

        let client = collaborator(&server);
        assert_eq!(
            client.insight("subject-1", "I feel tired").await.unwrap(),
            Some("User slept badly".to_string())
        );
        assert_eq!(client.insight("subject-2", "hello").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_remote_tool_success_and_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/tools/lookup_weather"))
            .and(body_json(json!({"subjectId": "subject-1", "args": {"city": "Oslo"}})))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"result": {"tempC": 4}})),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/tools/broken"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"error": "no data"})))
            .mount(&server)
            .await;

        let client = collaborator(&server);
        let ctx = ToolContext {
            subject_id: "subject-1".to_string(),
            session_id: "s1".to_string(),
            call_id: "call-1".to_string(),
        };

        let weather = RemoteTool::new(
            client.clone(),
            ToolDeclaration {
                name: "lookup_weather".to_string(),
                description: None,
                parameters: None,
            },
        );
        let args = json!({"city": "Oslo"}).as_object().cloned().unwrap();
        let result = weather.invoke(ctx.clone(), args).await.unwrap();
        assert_eq!(result["tempC"], 4);

        let broken = RemoteTool::new(
            client,
            ToolDeclaration {
                name: "broken".to_string(),
                description: None,
                parameters: None,
            },
        );
        assert_eq!(
            broken.invoke(ctx, Map::new()).await,
            Err(ToolError::Failed("no data".to_string()))
        );
    }

    #[test]
    fn test_endpoint_encodes_segments() {
        let client = HttpCollaborator::new("http://localhost:9000/api/", Duration::from_secs(1))
            .unwrap();
        let url = client.endpoint(&["identities", "a b/c"]).unwrap();
        assert_eq!(url.as_str(), "http://localhost:9000/api/identities/a%20b%2Fc");
    }
}
