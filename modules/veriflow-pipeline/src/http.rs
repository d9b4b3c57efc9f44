//! HTTP implementations of the collaborator traits, all served by one
//! collaborator gateway.

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;
use url::Url;
use veriflow_common::{retry, PipelineError, RetryPolicy, ScoreData, Translations, VideoSummary};

use crate::traits::{
    FactCheckRequest, FactCheckResult, FactChecker, ImageFetcher, ObjectStorage, OcrResult, OcrService, ParseRequest,
    ParsedPost, PostParser, ScoreGenerator, ScrapedPage, SocialScraper, TranscodeSubmission, Transcoder, Transcriber,
    Translator, ValidityChecker, ValidityRequest, ValidityVerdict, VideoInfo, VideoSource, VideoSummarizer,
};

/// 429 and 5xx are worth retrying; other statuses are the caller's fault.
fn transient_status(status: reqwest::StatusCode) -> bool {
    status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

/// JSON-over-HTTP client with API key auth and a retry policy for
/// transient failures.
#[derive(Clone)]
pub struct ServiceClient {
    http: reqwest::Client,
    base_url: Url,
    api_key: Option<String>,
    policy: RetryPolicy,
}

impl ServiceClient {
    pub fn new(base_url: &str, api_key: Option<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(300))
            .build()
            .context("Failed to build HTTP client")?;
        let base = format!("{}/", base_url.trim_end_matches('/'));
        Ok(Self {
            http,
            base_url: Url::parse(&base).with_context(|| format!("Invalid collaborator URL: {base_url}"))?,
            api_key,
            policy: RetryPolicy::http(),
        })
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    fn endpoint(&self, path: &str) -> Result<Url, PipelineError> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| PipelineError::Config(format!("bad endpoint {path}: {e}")))
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    pub async fn post_json<B, T>(&self, service: &'static str, path: &str, body: &B) -> Result<T, PipelineError>
    where
        B: Serialize + ?Sized + Sync,
        T: DeserializeOwned,
    {
        let url = &self.endpoint(path)?;
        retry(&self.policy, service, PipelineError::is_transient, || async move {
            let request = self.authorize(self.http.post(url.clone()).json(body));
            let resp = send(service, request).await?;
            resp.json::<T>()
                .await
                .map_err(|e| PipelineError::collaborator(service, format!("invalid response: {e}"), false))
        })
        .await
    }

    pub async fn get_bytes(&self, service: &'static str, url: &str, query: &[(&str, &str)]) -> Result<Vec<u8>, PipelineError> {
        retry(&self.policy, service, PipelineError::is_transient, || async move {
            let request = self.http.get(url).query(query);
            let request = if url.starts_with(self.base_url.as_str()) {
                self.authorize(request)
            } else {
                request
            };
            let resp = send(service, request).await?;
            let bytes = resp
                .bytes()
                .await
                .map_err(|e| PipelineError::collaborator(service, e.to_string(), true))?;
            Ok(bytes.to_vec())
        })
        .await
    }

    pub async fn post_bytes<T: DeserializeOwned>(
        &self,
        service: &'static str,
        path: &str,
        query: &[(&str, &str)],
        data: Vec<u8>,
        content_type: &str,
    ) -> Result<T, PipelineError> {
        let url = &self.endpoint(path)?;
        let data = &data;
        retry(&self.policy, service, PipelineError::is_transient, || async move {
            let request = self
                .http
                .post(url.clone())
                .query(query)
                .header(reqwest::header::CONTENT_TYPE, content_type)
                .body(data.clone());
            let resp = send(service, self.authorize(request)).await?;
            resp.json::<T>()
                .await
                .map_err(|e| PipelineError::collaborator(service, format!("invalid response: {e}"), false))
        })
        .await
    }

    pub fn url_for(&self, path: &str) -> Result<String, PipelineError> {
        Ok(self.endpoint(path)?.to_string())
    }
}

async fn send(service: &'static str, request: reqwest::RequestBuilder) -> Result<reqwest::Response, PipelineError> {
    let resp = request
        .send()
        .await
        .map_err(|e| PipelineError::collaborator(service, e.to_string(), true))?;
    let status = resp.status();
    if !status.is_success() {
        let message = resp.text().await.unwrap_or_default();
        debug!(service, status = %status, "Collaborator returned non-success");
        return Err(PipelineError::collaborator(
            service,
            format!("{status}: {message}"),
            transient_status(status),
        ));
    }
    Ok(resp)
}

// ---------------------------------------------------------------------------
// Gateway-backed collaborators
// ---------------------------------------------------------------------------

/// Every collaborator trait, served by the gateway at `collaborator_url`.
#[derive(Clone)]
pub struct HttpCollaborators {
    client: ServiceClient,
}

impl HttpCollaborators {
    pub fn new(client: ServiceClient) -> Self {
        Self { client }
    }
}

#[derive(Deserialize)]
struct Located {
    url: Option<String>,
}

#[derive(Deserialize)]
struct Uploaded {
    url: String,
}

#[derive(Deserialize)]
struct Transcript {
    transcript: String,
}

#[derive(Deserialize)]
struct Translated {
    translations: Translations,
}

#[async_trait]
impl OcrService for HttpCollaborators {
    async fn extract_text(&self, image_urls: &[String]) -> Result<OcrResult> {
        let body = json!({ "image_urls": image_urls, "max_concurrent": 5 });
        Ok(self.client.post_json("ocr", "ocr", &body).await?)
    }
}

#[async_trait]
impl ValidityChecker for HttpCollaborators {
    async fn check(&self, request: &ValidityRequest) -> Result<ValidityVerdict> {
        Ok(self.client.post_json("validity-check", "fact-check/input", request).await?)
    }
}

#[async_trait]
impl FactChecker for HttpCollaborators {
    async fn check(&self, request: &FactCheckRequest) -> Result<Option<FactCheckResult>> {
        Ok(self.client.post_json("deep-fact-check", "fact-check", request).await?)
    }
}

#[async_trait]
impl ScoreGenerator for HttpCollaborators {
    async fn score(&self, statement: &str, reason: &str) -> Result<ScoreData> {
        let body = json!({ "statement": statement, "reason": reason });
        Ok(self.client.post_json("score", "score", &body).await?)
    }
}

#[async_trait]
impl Translator for HttpCollaborators {
    async fn translate(&self, texts: &BTreeMap<String, String>, languages: &[&str]) -> Result<Translations> {
        let body = json!({ "texts": texts, "languages": languages });
        let out: Translated = self.client.post_json("translate", "translate", &body).await?;
        Ok(out.translations)
    }
}

#[async_trait]
impl SocialScraper for HttpCollaborators {
    async fn scrape(&self, url: &str) -> Result<ScrapedPage> {
        let body = json!({ "url": url, "full_page": true, "wait_until": "networkidle2" });
        Ok(self.client.post_json("social-scrape", "social/scrape", &body).await?)
    }
}

#[async_trait]
impl PostParser for HttpCollaborators {
    async fn parse(&self, request: &ParseRequest) -> Result<ParsedPost> {
        Ok(self.client.post_json("social-parse", "social/parse", request).await?)
    }
}

#[async_trait]
impl ObjectStorage for HttpCollaborators {
    async fn upload(&self, data: Vec<u8>, name: &str, content_type: &str) -> Result<String> {
        let out: Uploaded = self
            .client
            .post_bytes("object-storage", "storage/objects", &[("name", name)], data, content_type)
            .await?;
        Ok(out.url)
    }

    async fn locate(&self, name: &str) -> Result<Option<String>> {
        let out: Located = self
            .client
            .post_json("object-storage", "storage/locate", &json!({ "name": name }))
            .await?;
        Ok(out.url)
    }
}

#[async_trait]
impl ImageFetcher for HttpCollaborators {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        Ok(self.client.get_bytes("image-fetch", url, &[]).await?)
    }
}

#[async_trait]
impl VideoSource for HttpCollaborators {
    async fn info(&self, url: &str) -> Result<VideoInfo> {
        Ok(self.client.post_json("video-source", "video/info", &json!({ "url": url })).await?)
    }

    async fn download_audio(&self, url: &str) -> Result<Vec<u8>> {
        let endpoint = self.client.url_for("video/audio")?;
        Ok(self.client.get_bytes("video-source", &endpoint, &[("url", url)]).await?)
    }
}

#[async_trait]
impl Transcriber for HttpCollaborators {
    async fn transcribe(&self, audio_uri: &str) -> Result<String> {
        let out: Transcript = self
            .client
            .post_json("transcriber", "video/transcribe", &json!({ "audio_uri": audio_uri }))
            .await?;
        Ok(out.transcript)
    }
}

#[async_trait]
impl VideoSummarizer for HttpCollaborators {
    async fn summarize(&self, transcript: &str, video_title: Option<&str>) -> Result<VideoSummary> {
        let body = json!({ "transcript": transcript, "video_title": video_title });
        Ok(self.client.post_json("summarizer", "video/summarize", &body).await?)
    }
}

#[async_trait]
impl Transcoder for HttpCollaborators {
    async fn submit(&self, input_uri: &str, output_prefix: &str) -> Result<TranscodeSubmission> {
        let body = json!({ "input_uri": input_uri, "output_uri": output_prefix });
        Ok(self.client.post_json("transcoder", "transcode/jobs", &body).await?)
    }
}
