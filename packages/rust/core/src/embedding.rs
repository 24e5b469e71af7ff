//! Embedding collaborator: the [`Embedder`] seam and an HTTP client for
//! OpenAI-compatible `/embeddings` endpoints.

use std::future::Future;
use std::time::Duration;

use domainscout_shared::{DomainScoutError, EmbeddingConfig, EmbeddingProvider, Result, TokenizationMode};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use url::Url;

use crate::tokenization::PreparedTexts;

/// User-Agent string for embedding requests.
const USER_AGENT: &str = concat!("DomainScout/", env!("CARGO_PKG_VERSION"));

/// Vectors for a batch of texts, index-aligned with the input.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingBatch {
    pub vectors: Vec<Vec<f32>>,
    pub token_counts: Vec<u32>,
    /// How `token_counts` were obtained. Recorded for audit only.
    pub tokenization_mode: TokenizationMode,
    /// Provider-billed tokens when reported, otherwise the sum of `token_counts`.
    pub total_tokens: u64,
}

impl EmbeddingBatch {
    pub fn empty(tokenization_mode: TokenizationMode) -> Self {
        Self {
            vectors: Vec::new(),
            token_counts: Vec::new(),
            tokenization_mode,
            total_tokens: 0,
        }
    }
}

/// Turns texts into fixed-length vectors.
pub trait Embedder: Send + Sync {
    /// Model name recorded next to every stored vector.
    fn model_name(&self) -> &str;

    /// Embed texts already truncated to the model's input limit. Counts and
    /// mode are carried over from `input`.
    fn embed(&self, input: &PreparedTexts) -> impl Future<Output = Result<EmbeddingBatch>> + Send;
}

// ---------------------------------------------------------------------------
// HTTP embedder
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
    #[serde(default)]
    usage: Option<EmbeddingUsage>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

#[derive(Deserialize)]
struct EmbeddingUsage {
    total_tokens: Option<u64>,
}

/// Client for OpenAI and Azure OpenAI embedding deployments.
pub struct HttpEmbedder {
    client: Client,
    endpoint: Url,
    api_key: String,
    config: EmbeddingConfig,
}

impl HttpEmbedder {
    pub fn new(config: &EmbeddingConfig, api_key: impl Into<String>) -> Result<Self> {
        let endpoint = Url::parse(&config.endpoint).map_err(|e| {
            DomainScoutError::config(format!("invalid embedding endpoint '{}': {e}", config.endpoint))
        })?;
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| DomainScoutError::Embedding(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint,
            api_key: api_key.into(),
            config: config.clone(),
        })
    }

    async fn embed_batch(&self, batch: &[String]) -> Result<(Vec<Vec<f32>>, Option<u64>)> {
        let body = EmbeddingRequest {
            model: &self.config.model,
            input: batch,
        };
        let mut request = self.client.post(self.endpoint.clone()).json(&body);
        request = match self.config.provider {
            EmbeddingProvider::OpenAi => request.bearer_auth(&self.api_key),
            EmbeddingProvider::Azure => {
                let request = request.header("api-key", &self.api_key);
                match &self.config.api_version {
                    Some(version) => request.query(&[("api-version", version)]),
                    None => request,
                }
            }
        };

        let resp = request
            .send()
            .await
            .map_err(|e| DomainScoutError::Embedding(format!("request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let detail = resp.text().await.unwrap_or_default();
            return Err(DomainScoutError::Embedding(format!(
                "HTTP {status} from embedding endpoint: {detail}"
            )));
        }

        let mut parsed: EmbeddingResponse = resp
            .json()
            .await
            .map_err(|e| DomainScoutError::Embedding(format!("invalid embedding response: {e}")))?;

        if parsed.data.len() != batch.len() {
            return Err(DomainScoutError::Embedding(format!(
                "expected {} embeddings, got {}",
                batch.len(),
                parsed.data.len()
            )));
        }
        parsed.data.sort_by_key(|d| d.index);
        let vectors = parsed.data.into_iter().map(|d| d.embedding).collect();
        Ok((vectors, parsed.usage.and_then(|u| u.total_tokens)))
    }
}

impl Embedder for HttpEmbedder {
    fn model_name(&self) -> &str {
        &self.config.model
    }

    #[instrument(skip_all, fields(texts = input.texts.len(), model = %self.config.model))]
    async fn embed(&self, input: &PreparedTexts) -> Result<EmbeddingBatch> {
        let batch_size = self.config.batch_size.max(1);
        let mut batch = EmbeddingBatch::empty(input.tokenization_mode);
        for (chunk, counts) in input
            .texts
            .chunks(batch_size)
            .zip(input.token_counts.chunks(batch_size))
        {
            let (vectors, billed) = self.embed_batch(chunk).await?;
            batch.total_tokens +=
                billed.unwrap_or_else(|| counts.iter().map(|&c| u64::from(c)).sum());
            batch.vectors.extend(vectors);
            debug!(done = batch.vectors.len(), total = input.texts.len(), "embedded batch");
        }
        batch.token_counts = input.token_counts.clone();
        Ok(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenization::Tokenizer;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(server: &MockServer, provider: EmbeddingProvider, batch_size: usize) -> EmbeddingConfig {
        EmbeddingConfig {
            provider,
            endpoint: format!("{}/v1/embeddings", server.uri()),
            model: "test-embed".into(),
            api_version: Some("2024-02-15-preview".into()),
            batch_size,
            ..EmbeddingConfig::default()
        }
    }

    fn approx_input(texts: &[&str]) -> PreparedTexts {
        let texts: Vec<String> = texts.iter().map(|t| t.to_string()).collect();
        Tokenizer::Approx.prepare(&texts, 8192)
    }

    #[tokio::test]
    async fn openai_bearer_and_index_order() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(serde_json::json!({"model": "test-embed"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [
                    {"index": 1, "embedding": [0.0, 1.0]},
                    {"index": 0, "embedding": [1.0, 0.0]}
                ],
                "usage": {"total_tokens": 7}
            })))
            .mount(&server)
            .await;

        let embedder =
            HttpEmbedder::new(&config(&server, EmbeddingProvider::OpenAi, 16), "sk-test").unwrap();
        let batch = embedder
            .embed(&approx_input(&["first", "second"]))
            .await
            .expect("embed");

        assert_eq!(batch.vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
        assert_eq!(batch.token_counts, vec![2, 2]);
        assert_eq!(batch.total_tokens, 7);
        assert_eq!(batch.tokenization_mode, TokenizationMode::Approx);
        assert_eq!(embedder.model_name(), "test-embed");
    }

    #[tokio::test]
    async fn azure_key_header_version_and_batching() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .and(header("api-key", "az-key"))
            .and(query_param("api-version", "2024-02-15-preview"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{"index": 0, "embedding": [0.5, 0.5]}]
            })))
            .expect(3)
            .mount(&server)
            .await;

        let embedder =
            HttpEmbedder::new(&config(&server, EmbeddingProvider::Azure, 1), "az-key").unwrap();
        let batch = embedder
            .embed(&approx_input(&["abcd", "abcdefgh", "abc"]))
            .await
            .expect("embed");

        assert_eq!(batch.vectors.len(), 3);
        // No usage reported: falls back to the local counts.
        assert_eq!(batch.total_tokens, 1 + 2 + 1);
    }

    #[tokio::test]
    async fn exact_counts_pass_through() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{"index": 0, "embedding": [1.0]}]
            })))
            .mount(&server)
            .await;

        let tokenizer = Tokenizer::for_model("text-embedding-3-small", false).unwrap();
        let input = tokenizer.prepare(&["hello world".to_string()], 8192);
        let embedder =
            HttpEmbedder::new(&config(&server, EmbeddingProvider::OpenAi, 16), "k").unwrap();
        let batch = embedder.embed(&input).await.unwrap();

        assert_eq!(batch.tokenization_mode, TokenizationMode::Exact);
        assert_eq!(batch.token_counts, vec![2]);
        assert_eq!(batch.total_tokens, 2);
    }

    #[tokio::test]
    async fn http_error_is_an_embedding_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
            .mount(&server)
            .await;

        let embedder =
            HttpEmbedder::new(&config(&server, EmbeddingProvider::OpenAi, 16), "k").unwrap();
        let err = embedder.embed(&approx_input(&["x"])).await.unwrap_err();
        assert!(matches!(err, DomainScoutError::Embedding(_)));
        assert!(err.to_string().contains("429"));
    }

    #[tokio::test]
    async fn short_response_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{"index": 0, "embedding": [1.0]}]
            })))
            .mount(&server)
            .await;

        let embedder =
            HttpEmbedder::new(&config(&server, EmbeddingProvider::OpenAi, 16), "k").unwrap();
        let result = embedder.embed(&approx_input(&["a", "b"])).await;
        assert!(result.unwrap_err().to_string().contains("expected 2 embeddings"));
    }

    #[tokio::test]
    async fn empty_input_makes_no_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&server)
            .await;

        let embedder =
            HttpEmbedder::new(&config(&server, EmbeddingProvider::OpenAi, 16), "k").unwrap();
        let batch = embedder.embed(&approx_input(&[])).await.unwrap();
        assert!(batch.vectors.is_empty());
    }
}
