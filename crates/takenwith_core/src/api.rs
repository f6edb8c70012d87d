use std::collections::BTreeMap;
use std::env;
use std::thread::sleep;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result, bail};
use reqwest::blocking::Client;
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::camera::{MetadataEntry, parse_metadata};
use crate::config::BotConfig;

pub const NS_FILE: i32 = 6;
/// Titles per request accepted by the API for non-bot accounts.
pub const TITLES_PER_REQUEST: usize = 50;
/// `list=random` rejects larger limits.
pub const RANDOM_BATCH_LIMIT: usize = 20;

/// Opaque `continue` object returned by paginated queries.
pub type Continuation = BTreeMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

impl SortDirection {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ascending => "ascending",
            Self::Descending => "descending",
        }
    }
}

/// Generator queries that yield file pages with their metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileQuery {
    Uploads {
        user: String,
        start: Option<String>,
        limit: usize,
    },
    CategoryMembers {
        category: String,
        sortkey_prefix: Option<String>,
        limit: usize,
    },
    Random {
        limit: usize,
    },
    AllFiles {
        direction: SortDirection,
        start: Option<String>,
        limit: usize,
    },
}

impl FileQuery {
    pub fn limit(&self) -> usize {
        match self {
            Self::Uploads { limit, .. }
            | Self::CategoryMembers { limit, .. }
            | Self::Random { limit }
            | Self::AllFiles { limit, .. } => *limit,
        }
    }

    fn params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("action", "query".to_string()),
            ("prop", "imageinfo".to_string()),
            ("iiprop", "commonmetadata|metadata".to_string()),
        ];
        match self {
            Self::Uploads { user, start, limit } => {
                params.extend([
                    ("generator", "allimages".to_string()),
                    ("gaiuser", user.trim_start_matches("User:").to_string()),
                    ("gaisort", "timestamp".to_string()),
                    ("gaidir", SortDirection::Descending.as_str().to_string()),
                    ("gaistart", start.clone().unwrap_or_default()),
                    ("gailimit", limit.to_string()),
                ]);
            }
            Self::CategoryMembers {
                category,
                sortkey_prefix,
                limit,
            } => {
                params.extend([
                    ("generator", "categorymembers".to_string()),
                    ("gcmtitle", category.clone()),
                    ("gcmtype", "file".to_string()),
                    ("gcmsort", "sortkey".to_string()),
                    (
                        "gcmstartsortkeyprefix",
                        sortkey_prefix.clone().unwrap_or_default(),
                    ),
                    ("gcmlimit", limit.to_string()),
                ]);
            }
            Self::Random { limit } => {
                params.extend([
                    ("generator", "random".to_string()),
                    ("grnnamespace", NS_FILE.to_string()),
                    ("grnlimit", (*limit).min(RANDOM_BATCH_LIMIT).to_string()),
                ]);
            }
            Self::AllFiles {
                direction,
                start,
                limit,
            } => {
                params.extend([
                    ("generator", "allimages".to_string()),
                    ("gaisort", "timestamp".to_string()),
                    ("gaidir", direction.as_str().to_string()),
                    ("gaistart", start.clone().unwrap_or_default()),
                    ("gailimit", limit.to_string()),
                ]);
            }
        }
        params
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FilePage {
    pub title: String,
    pub missing: bool,
    pub common_metadata: Vec<MetadataEntry>,
    pub metadata: Vec<MetadataEntry>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FileBatch {
    pub files: Vec<FilePage>,
    pub continuation: Option<Continuation>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageText {
    pub title: String,
    pub exists: bool,
    pub content: String,
    /// Timestamp of the fetched revision; empty when the page doesn't exist.
    pub timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditRequest<'a> {
    pub title: &'a str,
    pub text: &'a str,
    pub summary: &'a str,
    /// Revision timestamp the new text was derived from. The server rejects
    /// the edit when the page changed since.
    pub base_timestamp: &'a str,
    pub minor: bool,
    pub nocreate: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditOutcome {
    Saved,
    NoChange,
}

/// An `error` object returned by the API.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("MediaWiki API error [{code}]: {info}")]
pub struct ApiError {
    pub code: String,
    pub info: String,
}

impl ApiError {
    pub fn new(code: &str, info: &str) -> Self {
        Self {
            code: code.to_string(),
            info: info.to_string(),
        }
    }

    pub fn is_protection(&self) -> bool {
        matches!(
            self.code.as_str(),
            "protectedpage"
                | "cascadeprotected"
                | "protectednamespace"
                | "protectednamespace-interface"
                | "protectedtitle"
        )
    }
}

/// Remote operations the categorisation pipeline depends on.
pub trait WikiApi {
    fn login(&mut self, username: &str, password: &str) -> Result<()>;
    /// One page of a generator query. Pass back the returned continuation to
    /// get the next one.
    fn query_files(
        &mut self,
        query: &FileQuery,
        continuation: Option<&Continuation>,
    ) -> Result<FileBatch>;
    /// Metadata for named files, following redirects.
    fn get_files(&mut self, titles: &[String]) -> Result<Vec<FilePage>>;
    fn get_page_text(&mut self, title: &str) -> Result<PageText>;
    fn edit_page(&mut self, request: &EditRequest<'_>) -> Result<EditOutcome>;
    /// File counts of the given categories. Categories that don't exist are
    /// absent from the result.
    fn category_file_counts(&mut self, categories: &[String]) -> Result<BTreeMap<String, i32>>;
    /// Current categories of the given pages. Missing pages are absent from
    /// the result; pages without categories map to an empty list.
    fn page_categories(&mut self, titles: &[String]) -> Result<BTreeMap<String, Vec<String>>>;
    fn request_count(&self) -> usize;
}

impl<T: WikiApi + ?Sized> WikiApi for &mut T {
    fn login(&mut self, username: &str, password: &str) -> Result<()> {
        (**self).login(username, password)
    }

    fn query_files(
        &mut self,
        query: &FileQuery,
        continuation: Option<&Continuation>,
    ) -> Result<FileBatch> {
        (**self).query_files(query, continuation)
    }

    fn get_files(&mut self, titles: &[String]) -> Result<Vec<FilePage>> {
        (**self).get_files(titles)
    }

    fn get_page_text(&mut self, title: &str) -> Result<PageText> {
        (**self).get_page_text(title)
    }

    fn edit_page(&mut self, request: &EditRequest<'_>) -> Result<EditOutcome> {
        (**self).edit_page(request)
    }

    fn category_file_counts(&mut self, categories: &[String]) -> Result<BTreeMap<String, i32>> {
        (**self).category_file_counts(categories)
    }

    fn page_categories(&mut self, titles: &[String]) -> Result<BTreeMap<String, Vec<String>>> {
        (**self).page_categories(titles)
    }

    fn request_count(&self) -> usize {
        (**self).request_count()
    }
}

#[derive(Debug, Clone)]
pub struct MediaWikiClientConfig {
    pub api_url: String,
    pub user_agent: String,
    pub timeout_ms: u64,
    pub rate_limit_read_ms: u64,
    pub max_retries: usize,
    pub retry_delay_ms: u64,
    pub maxlag_seconds: u64,
}

impl MediaWikiClientConfig {
    pub fn from_config(config: &BotConfig) -> Self {
        Self {
            api_url: config.api_url(),
            user_agent: config.user_agent(),
            timeout_ms: env_value_u64("WIKI_HTTP_TIMEOUT_MS", 30_000),
            rate_limit_read_ms: env_value_u64("WIKI_RATE_LIMIT_READ", 300),
            max_retries: env_value_usize("WIKI_HTTP_RETRIES", 2),
            retry_delay_ms: env_value_u64("WIKI_HTTP_RETRY_DELAY_MS", 500),
            maxlag_seconds: env_value_u64("WIKI_MAXLAG", 5),
        }
    }
}

pub struct MediaWikiClient {
    client: Client,
    config: MediaWikiClientConfig,
    last_request_at: Option<Instant>,
    request_count: usize,
    csrf_token: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Method {
    Get,
    Post,
}

impl MediaWikiClient {
    pub fn new(config: MediaWikiClientConfig) -> Result<Self> {
        Url::parse(&config.api_url)
            .with_context(|| format!("invalid WIKI_API_URL: {}", config.api_url))?;
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .user_agent(config.user_agent.clone())
            .cookie_store(true)
            .build()
            .context("failed to build MediaWiki HTTP client")?;

        Ok(Self {
            client,
            config,
            last_request_at: None,
            request_count: 0,
            csrf_token: None,
        })
    }

    fn request_json(&mut self, method: Method, params: &[(&str, String)]) -> Result<Value> {
        let mut pairs = Vec::with_capacity(params.len() + 3);
        pairs.push(("format".to_string(), "json".to_string()));
        pairs.push(("formatversion".to_string(), "2".to_string()));
        pairs.push(("maxlag".to_string(), self.config.maxlag_seconds.to_string()));
        for (key, value) in params {
            if !value.is_empty() {
                pairs.push(((*key).to_string(), value.clone()));
            }
        }

        for attempt in 0..=self.config.max_retries {
            self.apply_rate_limit();
            let request = match method {
                Method::Get => self.client.get(&self.config.api_url).query(&pairs),
                Method::Post => self.client.post(&self.config.api_url).form(&pairs),
            };

            match request.send() {
                Ok(response) => {
                    let status = response.status();
                    if !status.is_success() {
                        if attempt < self.config.max_retries && is_retryable_status(status) {
                            self.wait_before_retry(attempt);
                            continue;
                        }
                        bail!("MediaWiki API request failed with HTTP {status}");
                    }

                    let payload: Value = response
                        .json()
                        .context("failed to decode MediaWiki API JSON response")?;
                    if let Some(error) = payload.get("error") {
                        let code = error
                            .get("code")
                            .and_then(Value::as_str)
                            .unwrap_or("unknown_error");
                        let info = error
                            .get("info")
                            .and_then(Value::as_str)
                            .unwrap_or("unknown info");
                        if code == "maxlag" && attempt < self.config.max_retries {
                            debug!(info, "server lagged, backing off");
                            self.wait_before_retry(attempt);
                            continue;
                        }
                        return Err(ApiError::new(code, info).into());
                    }
                    return Ok(payload);
                }
                Err(error) => {
                    if attempt < self.config.max_retries && is_retryable_error(&error) {
                        self.wait_before_retry(attempt);
                        continue;
                    }
                    return Err(error).context("failed to call MediaWiki API");
                }
            }
        }

        bail!("MediaWiki API request exhausted retry budget")
    }

    fn apply_rate_limit(&mut self) {
        let delay = Duration::from_millis(self.config.rate_limit_read_ms);
        if let Some(last) = self.last_request_at {
            let elapsed = last.elapsed();
            if elapsed < delay {
                sleep(delay - elapsed);
            }
        }
        self.last_request_at = Some(Instant::now());
        self.request_count += 1;
    }

    fn wait_before_retry(&self, attempt: usize) {
        let exponent = u32::try_from(attempt).unwrap_or(16);
        let base = self
            .config
            .retry_delay_ms
            .saturating_mul(2u64.saturating_pow(exponent));
        let jitter = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|duration| u64::from(duration.subsec_millis() % 100))
            .unwrap_or(0);
        sleep(Duration::from_millis(base.saturating_add(jitter)));
    }

    fn ensure_csrf_token(&mut self) -> Result<String> {
        if let Some(token) = &self.csrf_token {
            return Ok(token.clone());
        }
        let response = self.request_json(
            Method::Get,
            &[
                ("action", "query".to_string()),
                ("meta", "tokens".to_string()),
            ],
        )?;
        let parsed: TokenQueryResponse =
            serde_json::from_value(response).context("failed to decode csrf token response")?;
        let token = parsed
            .query
            .tokens
            .and_then(|tokens| tokens.csrftoken)
            .ok_or_else(|| anyhow::anyhow!("failed to get MediaWiki csrf token"))?;
        self.csrf_token = Some(token.clone());
        Ok(token)
    }
}

impl WikiApi for MediaWikiClient {
    fn login(&mut self, username: &str, password: &str) -> Result<()> {
        let token_response = self.request_json(
            Method::Get,
            &[
                ("action", "query".to_string()),
                ("meta", "tokens".to_string()),
                ("type", "login".to_string()),
            ],
        )?;
        let token_payload: TokenQueryResponse = serde_json::from_value(token_response)
            .context("failed to decode login token response")?;
        let login_token = token_payload
            .query
            .tokens
            .and_then(|tokens| tokens.logintoken)
            .ok_or_else(|| anyhow::anyhow!("failed to get MediaWiki login token"))?;

        let login_response = self.request_json(
            Method::Post,
            &[
                ("action", "login".to_string()),
                ("lgname", username.to_string()),
                ("lgpassword", password.to_string()),
                ("lgtoken", login_token),
            ],
        )?;
        let login_payload: LoginResponse =
            serde_json::from_value(login_response).context("failed to decode login response")?;
        match login_payload.login.result.as_deref() {
            Some("Success") => {
                self.csrf_token = None;
                Ok(())
            }
            other => bail!(
                "MediaWiki login failed: {}",
                login_payload
                    .login
                    .reason
                    .or_else(|| other.map(ToString::to_string))
                    .unwrap_or_else(|| "unknown error".to_string())
            ),
        }
    }

    fn query_files(
        &mut self,
        query: &FileQuery,
        continuation: Option<&Continuation>,
    ) -> Result<FileBatch> {
        let mut params: Vec<(&str, String)> = query.params();
        if let Some(continuation) = continuation {
            for (key, value) in continuation {
                params.push((key.as_str(), value.clone()));
            }
        }

        let response = self.request_json(Method::Get, &params)?;
        if response_was_truncated(&response) {
            bail!(
                "file batch response was truncated by the server; reduce the batch size (currently {})",
                query.limit()
            );
        }
        let parsed: QueryResponse = serde_json::from_value(response)
            .context("failed to decode file generator response")?;

        Ok(FileBatch {
            files: parsed.query.pages.into_iter().map(file_page).collect(),
            continuation: parsed.continuation,
        })
    }

    fn get_files(&mut self, titles: &[String]) -> Result<Vec<FilePage>> {
        let mut files = Vec::new();
        for batch in titles.chunks(TITLES_PER_REQUEST) {
            let response = self.request_json(
                Method::Get,
                &[
                    ("action", "query".to_string()),
                    ("titles", batch.join("|")),
                    ("prop", "imageinfo".to_string()),
                    ("iiprop", "commonmetadata|metadata".to_string()),
                    ("redirects", "1".to_string()),
                ],
            )?;
            let parsed: QueryResponse = serde_json::from_value(response)
                .context("failed to decode file metadata response")?;
            files.extend(parsed.query.pages.into_iter().map(file_page));
        }
        Ok(files)
    }

    fn get_page_text(&mut self, title: &str) -> Result<PageText> {
        let response = self.request_json(
            Method::Get,
            &[
                ("action", "query".to_string()),
                ("titles", title.to_string()),
                ("prop", "revisions".to_string()),
                ("rvprop", "content|timestamp".to_string()),
                ("rvslots", "main".to_string()),
            ],
        )?;
        let parsed: QueryResponse =
            serde_json::from_value(response).context("failed to decode page content response")?;
        let page = parsed
            .query
            .pages
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("page not returned by API: {title}"))?;

        if page.missing.unwrap_or(false) || page.invalid.unwrap_or(false) {
            return Ok(PageText {
                title: page.title,
                exists: false,
                content: String::new(),
                timestamp: String::new(),
            });
        }
        let revision = page
            .revisions
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("no revision returned for {title}"))?;
        let content = revision
            .slots
            .and_then(|slots| slots.main)
            .map(|slot| slot.content)
            .ok_or_else(|| anyhow::anyhow!("no main slot content returned for {title}"))?;

        Ok(PageText {
            title: page.title,
            exists: true,
            content,
            timestamp: revision.timestamp,
        })
    }

    fn edit_page(&mut self, request: &EditRequest<'_>) -> Result<EditOutcome> {
        let token = self.ensure_csrf_token()?;
        let mut params = vec![
            ("action", "edit".to_string()),
            ("title", request.title.to_string()),
            ("text", request.text.to_string()),
            ("summary", request.summary.to_string()),
            ("bot", "1".to_string()),
            ("basetimestamp", request.base_timestamp.to_string()),
        ];
        if request.minor {
            params.push(("minor", "1".to_string()));
        }
        if request.nocreate {
            params.push(("nocreate", "1".to_string()));
        }
        params.push(("token", token));

        let response = match self.request_json(Method::Post, &params) {
            Ok(response) => response,
            Err(error) => {
                if error
                    .downcast_ref::<ApiError>()
                    .is_some_and(|api_error| api_error.code == "badtoken")
                {
                    self.csrf_token = None;
                }
                return Err(error);
            }
        };
        let edit_payload: EditResponse =
            serde_json::from_value(response).context("failed to decode edit response")?;
        let edit = edit_payload
            .edit
            .ok_or_else(|| anyhow::anyhow!("missing edit payload in API response"))?;
        if edit.result.as_deref() != Some("Success") {
            bail!(
                "MediaWiki edit failed for {}: {}",
                request.title,
                edit.result.unwrap_or_else(|| "unknown".to_string())
            );
        }
        if edit.nochange.unwrap_or(false) {
            Ok(EditOutcome::NoChange)
        } else {
            Ok(EditOutcome::Saved)
        }
    }

    fn category_file_counts(&mut self, categories: &[String]) -> Result<BTreeMap<String, i32>> {
        let mut counts = BTreeMap::new();
        for batch in categories.chunks(TITLES_PER_REQUEST) {
            let response = self.request_json(
                Method::Post,
                &[
                    ("action", "query".to_string()),
                    ("titles", batch.join("|")),
                    ("prop", "categoryinfo".to_string()),
                ],
            )?;
            let parsed: QueryResponse = serde_json::from_value(response)
                .context("failed to decode categoryinfo response")?;
            for page in parsed.query.pages {
                if page.missing.unwrap_or(false) || page.invalid.unwrap_or(false) {
                    continue;
                }
                // No categoryinfo means the category page exists but is empty.
                let files = page.categoryinfo.map(|info| info.files).unwrap_or(0);
                counts.insert(page.title, i32::try_from(files.max(0)).unwrap_or(i32::MAX));
            }
        }
        Ok(counts)
    }

    fn page_categories(&mut self, titles: &[String]) -> Result<BTreeMap<String, Vec<String>>> {
        let mut result: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for batch in titles.chunks(TITLES_PER_REQUEST) {
            let mut continuation: Option<Continuation> = None;
            loop {
                let mut params = vec![
                    ("action", "query".to_string()),
                    ("titles", batch.join("|")),
                    ("prop", "categories".to_string()),
                    ("cllimit", "max".to_string()),
                ];
                if let Some(values) = &continuation {
                    for (key, value) in values {
                        params.push((key.as_str(), value.clone()));
                    }
                }

                let response = self.request_json(Method::Post, &params)?;
                let parsed: QueryResponse = serde_json::from_value(response)
                    .context("failed to decode page categories response")?;
                for page in parsed.query.pages {
                    if page.missing.unwrap_or(false) || page.invalid.unwrap_or(false) {
                        continue;
                    }
                    result
                        .entry(page.title)
                        .or_default()
                        .extend(page.categories.into_iter().map(|item| item.title));
                }

                continuation = parsed.continuation;
                if continuation.is_none() {
                    break;
                }
            }
        }
        Ok(result)
    }

    fn request_count(&self) -> usize {
        self.request_count
    }
}

fn file_page(page: PageQueryItem) -> FilePage {
    let missing = page.missing.unwrap_or(false) || page.invalid.unwrap_or(false);
    let info = page.imageinfo.into_iter().next();
    let (common_metadata, metadata) = match info {
        Some(info) => (
            info.commonmetadata
                .as_ref()
                .map(parse_metadata)
                .unwrap_or_default(),
            info.metadata.as_ref().map(parse_metadata).unwrap_or_default(),
        ),
        None => (Vec::new(), Vec::new()),
    };
    FilePage {
        title: page.title,
        missing,
        common_metadata,
        metadata,
    }
}

fn response_was_truncated(payload: &Value) -> bool {
    payload
        .get("warnings")
        .is_some_and(|warnings| warnings.to_string().contains("truncated"))
}

fn env_value_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

fn env_value_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<usize>().ok())
        .unwrap_or(default)
}

fn is_retryable_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::REQUEST_TIMEOUT
            | StatusCode::TOO_MANY_REQUESTS
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

fn is_retryable_error(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect() || error.is_request()
}

#[derive(Debug, Deserialize, Default)]
struct QueryResponse {
    #[serde(default)]
    query: QueryPayload,
    #[serde(default, rename = "continue")]
    continuation: Option<Continuation>,
}

#[derive(Debug, Deserialize, Default)]
struct QueryPayload {
    #[serde(default)]
    pages: Vec<PageQueryItem>,
}

#[derive(Debug, Deserialize)]
struct PageQueryItem {
    title: String,
    missing: Option<bool>,
    invalid: Option<bool>,
    #[serde(default)]
    imageinfo: Vec<ImageInfoItem>,
    #[serde(default)]
    revisions: Vec<RevisionQueryItem>,
    #[serde(default)]
    categories: Vec<CategoryItem>,
    categoryinfo: Option<CategoryInfoItem>,
}

#[derive(Debug, Deserialize)]
struct ImageInfoItem {
    commonmetadata: Option<Value>,
    metadata: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct RevisionQueryItem {
    timestamp: String,
    slots: Option<RevisionSlotContainer>,
}

#[derive(Debug, Deserialize)]
struct RevisionSlotContainer {
    main: Option<RevisionMainSlot>,
}

#[derive(Debug, Deserialize)]
struct RevisionMainSlot {
    content: String,
}

#[derive(Debug, Deserialize)]
struct CategoryItem {
    title: String,
}

#[derive(Debug, Deserialize)]
struct CategoryInfoItem {
    #[serde(default)]
    files: i64,
}

#[derive(Debug, Deserialize, Default)]
struct TokenQueryResponse {
    #[serde(default)]
    query: TokenQueryPayload,
}

#[derive(Debug, Deserialize, Default)]
struct TokenQueryPayload {
    tokens: Option<TokenPayload>,
}

#[derive(Debug, Deserialize, Default)]
struct TokenPayload {
    logintoken: Option<String>,
    csrftoken: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct LoginResponse {
    #[serde(default)]
    login: LoginPayload,
}

#[derive(Debug, Deserialize, Default)]
struct LoginPayload {
    result: Option<String>,
    reason: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct EditResponse {
    edit: Option<EditPayload>,
}

#[derive(Debug, Deserialize, Default)]
struct EditPayload {
    result: Option<String>,
    nochange: Option<bool>,
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::{BTreeMap, VecDeque};

    use anyhow::{Result, bail};

    use super::{
        ApiError, Continuation, EditOutcome, EditRequest, FileBatch, FilePage, FileQuery,
        PageText, WikiApi,
    };

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct RecordedEdit {
        pub title: String,
        pub text: String,
        pub summary: String,
        pub base_timestamp: String,
    }

    /// In-memory wiki used by pipeline tests.
    #[derive(Default)]
    pub struct MockApi {
        pub batches: VecDeque<FileBatch>,
        pub files: BTreeMap<String, FilePage>,
        pub pages: BTreeMap<String, PageText>,
        pub category_counts: BTreeMap<String, i32>,
        pub page_categories: BTreeMap<String, Vec<String>>,
        /// Errors returned by the next edit calls, in order.
        pub edit_failures: VecDeque<ApiError>,
        pub edits: Vec<RecordedEdit>,
        pub queries: Vec<(FileQuery, Option<Continuation>)>,
        pub count_lookups: Vec<Vec<String>>,
        pub category_lookups: Vec<Vec<String>>,
        pub page_fetches: usize,
        pub request_count: usize,
    }

    impl MockApi {
        pub fn with_page(mut self, title: &str, content: &str) -> Self {
            self.pages.insert(
                title.to_string(),
                PageText {
                    title: title.to_string(),
                    exists: true,
                    content: content.to_string(),
                    timestamp: "2024-01-01T00:00:00Z".to_string(),
                },
            );
            self
        }
    }

    impl WikiApi for MockApi {
        fn login(&mut self, _username: &str, _password: &str) -> Result<()> {
            self.request_count += 1;
            Ok(())
        }

        fn query_files(
            &mut self,
            query: &FileQuery,
            continuation: Option<&Continuation>,
        ) -> Result<FileBatch> {
            self.request_count += 1;
            self.queries.push((query.clone(), continuation.cloned()));
            Ok(self.batches.pop_front().unwrap_or_default())
        }

        fn get_files(&mut self, titles: &[String]) -> Result<Vec<FilePage>> {
            self.request_count += 1;
            Ok(titles
                .iter()
                .map(|title| {
                    self.files.get(title).cloned().unwrap_or_else(|| FilePage {
                        title: title.clone(),
                        missing: true,
                        common_metadata: Vec::new(),
                        metadata: Vec::new(),
                    })
                })
                .collect())
        }

        fn get_page_text(&mut self, title: &str) -> Result<PageText> {
            self.request_count += 1;
            self.page_fetches += 1;
            Ok(self.pages.get(title).cloned().unwrap_or_else(|| PageText {
                title: title.to_string(),
                exists: false,
                content: String::new(),
                timestamp: String::new(),
            }))
        }

        fn edit_page(&mut self, request: &EditRequest<'_>) -> Result<EditOutcome> {
            self.request_count += 1;
            if let Some(error) = self.edit_failures.pop_front() {
                return Err(error.into());
            }
            if request.nocreate && !self.pages.contains_key(request.title) {
                bail!(ApiError::new("missingtitle", "The page you specified doesn't exist."));
            }
            self.edits.push(RecordedEdit {
                title: request.title.to_string(),
                text: request.text.to_string(),
                summary: request.summary.to_string(),
                base_timestamp: request.base_timestamp.to_string(),
            });
            let unchanged = self
                .pages
                .get(request.title)
                .is_some_and(|page| page.content == request.text);
            self.pages.insert(
                request.title.to_string(),
                PageText {
                    title: request.title.to_string(),
                    exists: true,
                    content: request.text.to_string(),
                    timestamp: "2024-01-02T00:00:00Z".to_string(),
                },
            );
            if unchanged {
                Ok(EditOutcome::NoChange)
            } else {
                Ok(EditOutcome::Saved)
            }
        }

        fn category_file_counts(
            &mut self,
            categories: &[String],
        ) -> Result<BTreeMap<String, i32>> {
            self.request_count += 1;
            self.count_lookups.push(categories.to_vec());
            Ok(categories
                .iter()
                .filter_map(|category| {
                    self.category_counts
                        .get(category)
                        .map(|count| (category.clone(), *count))
                })
                .collect())
        }

        fn page_categories(
            &mut self,
            titles: &[String],
        ) -> Result<BTreeMap<String, Vec<String>>> {
            self.request_count += 1;
            self.category_lookups.push(titles.to_vec());
            Ok(titles
                .iter()
                .filter_map(|title| {
                    self.page_categories
                        .get(title)
                        .map(|categories| (title.clone(), categories.clone()))
                })
                .collect())
        }

        fn request_count(&self) -> usize {
            self.request_count
        }
    }
}
