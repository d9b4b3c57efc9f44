// Test mocks for the verification pipeline.
//
// One mock per collaborator trait, each configurable after construction so a
// test can hold an `Arc` to it and still change its behaviour:
// - MockOcr, MockValidity, MockFactChecker, MockScorer, MockTranslator
// - MockScraper, MockParser, MockImageFetcher, MemoryObjectStorage
// - MockVideoSource, MockTranscriber, MockSummarizer, MockTranscoder
//
// Plus `TestHarness`, which wires them to the in-memory store, broker and
// push backend.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;
use veriflow_common::{MediaPlayback, PushMessage, RetryPolicy, ScoreData, Translations, Verification, VideoSummary};
use veriflow_notify::{DispatchSettings, MemoryPushBackend, NotificationDispatcher};
use veriflow_queue::{MemoryBroker, QueueManager, ReceivedMessage};
use veriflow_store::{
    MemoryCooldownCache, MemoryNotificationStore, MemoryUserDirectory, MemoryVerificationStore, UserProfile,
    VerificationStore,
};

use crate::deps::{PipelineDeps, PipelineSettings};
use crate::traits::{
    FactCheckRequest, FactCheckResult, FactChecker, ImageFetcher, ImageText, ObjectStorage, OcrResult, OcrService,
    ParseRequest, ParsedPost, PostParser, ScoreGenerator, ScrapedPage, SocialScraper, TranscodeSubmission, Transcoder,
    Transcriber, Translator, ValidityChecker, ValidityRequest, ValidityVerdict, VideoInfo, VideoSource,
    VideoSummarizer,
};

pub const OWNER: &str = "owner";
pub const OWNER_TOKEN: &str = "owner-token";

// ---------------------------------------------------------------------------
// Fact-check collaborators
// ---------------------------------------------------------------------------

/// Per-URL OCR text. Unregistered URLs come back without text.
#[derive(Default)]
pub struct MockOcr {
    texts: Mutex<HashMap<String, String>>,
    failing: Mutex<bool>,
    calls: AtomicUsize,
}

impl MockOcr {
    pub fn with_text(&self, url: &str, text: &str) {
        self.texts.lock().unwrap().insert(url.to_string(), text.to_string());
    }

    pub fn fail(&self) {
        *self.failing.lock().unwrap() = true;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OcrService for MockOcr {
    async fn extract_text(&self, image_urls: &[String]) -> Result<OcrResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if *self.failing.lock().unwrap() {
            bail!("ocr unavailable");
        }
        let texts = self.texts.lock().unwrap();
        Ok(OcrResult {
            images: image_urls
                .iter()
                .map(|url| ImageText {
                    url: url.clone(),
                    text: texts.get(url).cloned(),
                })
                .collect(),
        })
    }
}

#[derive(Clone)]
enum Verdict {
    Valid,
    Invalid(String),
    Error,
}

pub struct MockValidity {
    verdict: Mutex<Verdict>,
    /// Verdicts for statements containing the key; checked before `verdict`.
    overrides: Mutex<Vec<(String, Verdict)>>,
    preview: Mutex<Option<veriflow_common::PreviewData>>,
    requests: Mutex<Vec<ValidityRequest>>,
}

impl Default for MockValidity {
    fn default() -> Self {
        Self {
            verdict: Mutex::new(Verdict::Valid),
            overrides: Mutex::new(Vec::new()),
            preview: Mutex::new(None),
            requests: Mutex::new(Vec::new()),
        }
    }
}

impl MockValidity {
    pub fn valid(&self) {
        *self.verdict.lock().unwrap() = Verdict::Valid;
    }

    pub fn invalid(&self, reason: &str) {
        *self.verdict.lock().unwrap() = Verdict::Invalid(reason.to_string());
    }

    /// The collaborator itself errors (not a verdict).
    pub fn error(&self) {
        *self.verdict.lock().unwrap() = Verdict::Error;
    }

    pub fn invalid_for(&self, statement: &str, reason: &str) {
        self.overrides
            .lock()
            .unwrap()
            .push((statement.to_string(), Verdict::Invalid(reason.to_string())));
    }

    pub fn error_for(&self, statement: &str) {
        self.overrides.lock().unwrap().push((statement.to_string(), Verdict::Error));
    }

    pub fn with_preview(&self, preview: veriflow_common::PreviewData) {
        *self.preview.lock().unwrap() = Some(preview);
    }

    pub fn requests(&self) -> Vec<ValidityRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ValidityChecker for MockValidity {
    async fn check(&self, request: &ValidityRequest) -> Result<ValidityVerdict> {
        self.requests.lock().unwrap().push(request.clone());
        let preview_data = self.preview.lock().unwrap().clone();
        let verdict = self
            .overrides
            .lock()
            .unwrap()
            .iter()
            .find(|(key, _)| request.statement.contains(key.as_str()))
            .map(|(_, verdict)| verdict.clone())
            .unwrap_or_else(|| self.verdict.lock().unwrap().clone());
        match &verdict {
            Verdict::Valid => Ok(ValidityVerdict {
                is_valid_for_fact_check: true,
                enhanced_statement: format!("enhanced: {}", request.statement),
                error_reason: None,
                preview_data,
            }),
            Verdict::Invalid(reason) => Ok(ValidityVerdict {
                is_valid_for_fact_check: false,
                enhanced_statement: String::new(),
                error_reason: Some(reason.clone()),
                preview_data: None,
            }),
            Verdict::Error => Err(anyhow!("validity model unavailable")),
        }
    }
}

enum CheckResponse {
    Result(FactCheckResult),
    Empty,
    Error,
}

pub struct MockFactChecker {
    response: Mutex<CheckResponse>,
    requests: Mutex<Vec<FactCheckRequest>>,
}

impl Default for MockFactChecker {
    fn default() -> Self {
        Self {
            response: Mutex::new(CheckResponse::Result(fact_check_result(0.2, "false"))),
            requests: Mutex::new(Vec::new()),
        }
    }
}

impl MockFactChecker {
    pub fn returns(&self, result: FactCheckResult) {
        *self.response.lock().unwrap() = CheckResponse::Result(result);
    }

    pub fn returns_nothing(&self) {
        *self.response.lock().unwrap() = CheckResponse::Empty;
    }

    pub fn fail(&self) {
        *self.response.lock().unwrap() = CheckResponse::Error;
    }

    pub fn requests(&self) -> Vec<FactCheckRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl FactChecker for MockFactChecker {
    async fn check(&self, request: &FactCheckRequest) -> Result<Option<FactCheckResult>> {
        self.requests.lock().unwrap().push(request.clone());
        match &*self.response.lock().unwrap() {
            CheckResponse::Result(r) => Ok(Some(r.clone())),
            CheckResponse::Empty => Ok(None),
            CheckResponse::Error => Err(anyhow!("deep check timed out")),
        }
    }
}

pub fn fact_check_result(factuality: f64, reason: &str) -> FactCheckResult {
    FactCheckResult {
        factuality,
        reason: reason.to_string(),
        reason_summary: Some(format!("summary: {reason}")),
        score_justification: None,
        fact_status: None,
        references: Vec::new(),
    }
}

pub struct MockScorer {
    score: Mutex<Option<f64>>,
}

impl Default for MockScorer {
    fn default() -> Self {
        Self {
            score: Mutex::new(Some(20.0)),
        }
    }
}

impl MockScorer {
    pub fn scores(&self, score: f64) {
        *self.score.lock().unwrap() = Some(score);
    }

    pub fn fail(&self) {
        *self.score.lock().unwrap() = None;
    }
}

#[async_trait]
impl ScoreGenerator for MockScorer {
    async fn score(&self, _statement: &str, reason: &str) -> Result<ScoreData> {
        let Some(score) = *self.score.lock().unwrap() else {
            bail!("scorer unavailable");
        };
        Ok(ScoreData {
            score,
            reasoning: reason.to_string(),
            justification: None,
        })
    }
}

/// Prefixes every text with its language code.
#[derive(Default)]
pub struct MockTranslator {
    failing: Mutex<bool>,
    calls: AtomicUsize,
}

impl MockTranslator {
    pub fn fail(&self) {
        *self.failing.lock().unwrap() = true;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Translator for MockTranslator {
    async fn translate(&self, texts: &BTreeMap<String, String>, languages: &[&str]) -> Result<Translations> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if *self.failing.lock().unwrap() {
            bail!("translator quota exceeded");
        }
        Ok(texts
            .iter()
            .map(|(field, text)| {
                let langs = languages
                    .iter()
                    .map(|lang| (lang.to_string(), format!("[{lang}] {text}")))
                    .collect();
                (field.clone(), langs)
            })
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Social media
// ---------------------------------------------------------------------------

/// Scripted responses, then a default page with a screenshot.
#[derive(Default)]
pub struct MockScraper {
    script: Mutex<VecDeque<Result<ScrapedPage, String>>>,
    during_next: Mutex<Option<Box<dyn FnOnce() + Send>>>,
    calls: AtomicUsize,
}

impl MockScraper {
    pub fn then_page(&self, page: ScrapedPage) {
        self.script.lock().unwrap().push_back(Ok(page));
    }

    pub fn then_error(&self, message: &str) {
        self.script.lock().unwrap().push_back(Err(message.to_string()));
    }

    /// Run `f` while the next scrape is in flight.
    pub fn during_next_scrape(&self, f: impl FnOnce() + Send + 'static) {
        *self.during_next.lock().unwrap() = Some(Box::new(f));
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

pub fn scraped_page(screenshot: Option<&str>) -> ScrapedPage {
    ScrapedPage {
        content: "# Post\n\nThe bridge was closed yesterday.".to_string(),
        screenshot_url: screenshot.map(str::to_string),
    }
}

#[async_trait]
impl SocialScraper for MockScraper {
    async fn scrape(&self, _url: &str) -> Result<ScrapedPage> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        let during = self.during_next.lock().unwrap().take();
        if let Some(f) = during {
            f();
        }
        match self.script.lock().unwrap().pop_front() {
            Some(Ok(page)) => Ok(page),
            Some(Err(message)) => Err(anyhow!(message)),
            None => Ok(scraped_page(Some(&format!("https://shots.example/{n}.png")))),
        }
    }
}

#[derive(Default)]
pub struct MockParser {
    script: Mutex<VecDeque<ParsedPost>>,
    requests: Mutex<Vec<ParseRequest>>,
}

impl MockParser {
    pub fn then_post(&self, post: ParsedPost) {
        self.script.lock().unwrap().push_back(post);
    }

    pub fn requests(&self) -> Vec<ParseRequest> {
        self.requests.lock().unwrap().clone()
    }
}

pub fn parsed_post(text: &str) -> ParsedPost {
    ParsedPost {
        text_content: text.to_string(),
        author_name: Some("Nino".to_string()),
        post_date: Some("2024-05-01T10:00:00+04:00".to_string()),
        ..ParsedPost::default()
    }
}

#[async_trait]
impl PostParser for MockParser {
    async fn parse(&self, request: &ParseRequest) -> Result<ParsedPost> {
        self.requests.lock().unwrap().push(request.clone());
        Ok(self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| parsed_post("The bridge was closed yesterday.")))
    }
}

/// Objects live in memory and get `mem://` URLs.
#[derive(Default)]
pub struct MemoryObjectStorage {
    objects: Mutex<HashMap<String, Vec<u8>>>,
    uploads: AtomicUsize,
}

impl MemoryObjectStorage {
    pub fn put(&self, name: &str, data: &[u8]) {
        self.objects.lock().unwrap().insert(name.to_string(), data.to_vec());
    }

    pub fn contains(&self, name: &str) -> bool {
        self.objects.lock().unwrap().contains_key(name)
    }

    pub fn uploads(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectStorage for MemoryObjectStorage {
    async fn upload(&self, data: Vec<u8>, name: &str, _content_type: &str) -> Result<String> {
        self.uploads.fetch_add(1, Ordering::SeqCst);
        self.objects.lock().unwrap().insert(name.to_string(), data);
        Ok(format!("mem://{name}"))
    }

    async fn locate(&self, name: &str) -> Result<Option<String>> {
        Ok(self.contains(name).then(|| format!("mem://{name}")))
    }
}

/// Serves a few bytes for any URL, except URLs set to fail.
#[derive(Default)]
pub struct MockImageFetcher {
    failing: Mutex<HashMap<String, u32>>,
    broken: Mutex<HashSet<String>>,
}

impl MockImageFetcher {
    /// The next `n` fetches of `url` fail.
    pub fn fail_times(&self, url: &str, n: u32) {
        self.failing.lock().unwrap().insert(url.to_string(), n);
    }

    /// Every fetch of `url` fails.
    pub fn break_url(&self, url: &str) {
        self.broken.lock().unwrap().insert(url.to_string());
    }
}

#[async_trait]
impl ImageFetcher for MockImageFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        if self.broken.lock().unwrap().contains(url) {
            bail!("403 fetching {url}");
        }
        if let Some(remaining) = self.failing.lock().unwrap().get_mut(url) {
            if *remaining > 0 {
                *remaining -= 1;
                bail!("link expired: {url}");
            }
        }
        Ok(url.as_bytes().to_vec())
    }
}

// ---------------------------------------------------------------------------
// Video
// ---------------------------------------------------------------------------

pub struct MockVideoSource {
    info: Mutex<VideoInfo>,
    delay: Mutex<Duration>,
    downloads: AtomicUsize,
}

impl Default for MockVideoSource {
    fn default() -> Self {
        Self {
            info: Mutex::new(VideoInfo {
                id: "vid-1".to_string(),
                duration_secs: 600,
                title: Some("Evening news".to_string()),
            }),
            delay: Mutex::new(Duration::ZERO),
            downloads: AtomicUsize::new(0),
        }
    }
}

impl MockVideoSource {
    pub fn with_info(&self, id: &str, duration_secs: u64) {
        let mut info = self.info.lock().unwrap();
        info.id = id.to_string();
        info.duration_secs = duration_secs;
    }

    /// Every download takes this long.
    pub fn slow_download(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn downloads(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VideoSource for MockVideoSource {
    async fn info(&self, _url: &str) -> Result<VideoInfo> {
        Ok(self.info.lock().unwrap().clone())
    }

    async fn download_audio(&self, _url: &str) -> Result<Vec<u8>> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok(b"audio".to_vec())
    }
}

#[derive(Default)]
pub struct MockTranscriber {
    calls: AtomicUsize,
}

impl MockTranscriber {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transcriber for MockTranscriber {
    async fn transcribe(&self, audio_uri: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(format!("transcript of {audio_uri}"))
    }
}

#[derive(Default)]
pub struct MockSummarizer;

pub fn video_summary() -> VideoSummary {
    VideoSummary {
        title: Some("Evening news".to_string()),
        short_summary: Some("The minister announced a new bridge.".to_string()),
        statements: vec!["The bridge will open in May.".to_string()],
        relevant_statements: Vec::new(),
    }
}

#[async_trait]
impl VideoSummarizer for MockSummarizer {
    async fn summarize(&self, _transcript: &str, _video_title: Option<&str>) -> Result<VideoSummary> {
        Ok(video_summary())
    }
}

#[derive(Default)]
pub struct MockTranscoder {
    submitted: AtomicUsize,
}

#[async_trait]
impl Transcoder for MockTranscoder {
    async fn submit(&self, _input_uri: &str, output_prefix: &str) -> Result<TranscodeSubmission> {
        let n = self.submitted.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(TranscodeSubmission {
            job_name: format!("jobs/{n}"),
            playback: MediaPlayback {
                hls: format!("{output_prefix}manifest.m3u8"),
                dash: format!("{output_prefix}manifest.mpd"),
                mp4: format!("{output_prefix}video.mp4"),
                thumbnail: format!("{output_prefix}thumb.jpg"),
            },
        })
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

/// In-memory store, broker, push backend and mocks, wired into `PipelineDeps`.
/// The owner `OWNER` has push token `OWNER_TOKEN`.
pub struct TestHarness {
    pub store: Arc<MemoryVerificationStore>,
    pub users: Arc<MemoryUserDirectory>,
    pub broker: Arc<MemoryBroker>,
    pub queue: Arc<QueueManager>,
    pub push: Arc<MemoryPushBackend>,
    pub records: Arc<MemoryNotificationStore>,
    pub cooldowns: Arc<MemoryCooldownCache>,
    pub notifier: Arc<NotificationDispatcher>,

    pub ocr: Arc<MockOcr>,
    pub validity: Arc<MockValidity>,
    pub fact_checker: Arc<MockFactChecker>,
    pub scorer: Arc<MockScorer>,
    pub translator: Arc<MockTranslator>,
    pub scraper: Arc<MockScraper>,
    pub parser: Arc<MockParser>,
    pub storage: Arc<MemoryObjectStorage>,
    pub images: Arc<MockImageFetcher>,
    pub video: Arc<MockVideoSource>,
    pub transcriber: Arc<MockTranscriber>,
    pub summarizer: Arc<MockSummarizer>,
    pub transcoder: Arc<MockTranscoder>,

    pub settings: PipelineSettings,
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

impl TestHarness {
    pub fn new() -> Self {
        let store = Arc::new(MemoryVerificationStore::new());
        let users = Arc::new(MemoryUserDirectory::with_users([
            UserProfile::new(OWNER).with_token(OWNER_TOKEN).with_username("owner")
        ]));
        let broker = Arc::new(MemoryBroker::new());
        let queue = Arc::new(
            QueueManager::new(broker.clone())
                .with_publish_policy(RetryPolicy::once())
                .with_poll_interval(Duration::from_millis(10)),
        );
        let push = Arc::new(MemoryPushBackend::new());
        let records = Arc::new(MemoryNotificationStore::new());
        let cooldowns = Arc::new(MemoryCooldownCache::new());
        let notifier = Arc::new(NotificationDispatcher::new(
            push.clone(),
            users.clone(),
            records.clone(),
            cooldowns.clone(),
            DispatchSettings {
                retry: RetryPolicy::http().without_delay(),
                ..DispatchSettings::default()
            },
        ));

        Self {
            store,
            users,
            broker,
            queue,
            push,
            records,
            cooldowns,
            notifier,
            ocr: Arc::default(),
            validity: Arc::default(),
            fact_checker: Arc::default(),
            scorer: Arc::default(),
            translator: Arc::default(),
            scraper: Arc::default(),
            parser: Arc::default(),
            storage: Arc::default(),
            images: Arc::default(),
            video: Arc::default(),
            transcriber: Arc::default(),
            summarizer: Arc::default(),
            transcoder: Arc::default(),
            settings: PipelineSettings {
                scrape_retry: RetryPolicy::scrape().without_delay(),
                ..PipelineSettings::default()
            },
        }
    }

    pub fn deps(&self) -> PipelineDeps {
        PipelineDeps::builder()
            .store(self.store.clone())
            .users(self.users.clone())
            .queue(self.queue.clone())
            .notifier(self.notifier.clone())
            .ocr(self.ocr.clone())
            .validity(self.validity.clone())
            .fact_checker(self.fact_checker.clone())
            .scorer(self.scorer.clone())
            .translator(self.translator.clone())
            .scraper(self.scraper.clone())
            .parser(self.parser.clone())
            .storage(self.storage.clone())
            .images(self.images.clone())
            .video(self.video.clone())
            .transcriber(self.transcriber.clone())
            .summarizer(self.summarizer.clone())
            .transcoder(self.transcoder.clone())
            .settings(self.settings.clone())
            .build()
    }

    /// A fresh verification owned by `OWNER`.
    pub fn verification(&self) -> Verification {
        Verification::new(OWNER, Uuid::new_v4())
    }

    pub async fn insert(&self, v: Verification) -> Uuid {
        let id = v.id;
        self.store.insert(&v).await.expect("insert verification");
        id
    }

    pub fn get(&self, id: Uuid) -> Verification {
        self.store.snapshot(id).expect("verification exists")
    }

    /// Pushes delivered to the owner's device, oldest first.
    pub fn owner_pushes(&self) -> Vec<PushMessage> {
        self.push.sent_to(OWNER_TOKEN)
    }

    pub fn published(&self, topic: &str) -> Vec<serde_json::Value> {
        self.broker.published(topic)
    }
}

/// A leased message as a worker would receive it.
pub fn message<T: Serialize>(payload: &T, delivery_attempt: u32) -> ReceivedMessage {
    ReceivedMessage {
        ack_id: Uuid::new_v4().to_string(),
        message_id: Uuid::new_v4().to_string(),
        data: serde_json::to_vec(payload).expect("serializable payload"),
        delivery_attempt,
        publish_time: Utc::now(),
    }
}
