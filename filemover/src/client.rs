//! # MediaWiki Action API client
//!
//! [`MediaWikiClient`] implements the core [`Wiki`] trait over HTTP with
//! `reqwest`. One client is bound to one `api.php` endpoint; the CLI builds one
//! for the source corpus and one for the destination.
//!
//! - Queries use `format=json&formatversion=2` and follow `continue` blocks.
//! - Title batches are split into chunks the API accepts.
//! - Writes (edit, upload) fetch a CSRF token first. Logging in is not handled
//!   here: the client uses whatever session the endpoint grants (cookies are
//!   kept between requests).

use async_trait::async_trait;
use filemover_core::contract::{ApiError, Revision, Wiki};
use reqwest::multipart::{Form, Part};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

/// Most titles a single query may name.
const MAX_TITLES: usize = 50;

type Params = Vec<(String, String)>;

pub struct MediaWikiClient {
    http: reqwest::Client,
    api_url: String,
}

impl MediaWikiClient {
    pub fn new(api_url: impl Into<String>) -> Result<Self, ApiError> {
        let api_url = api_url.into();
        let http = reqwest::Client::builder()
            .cookie_store(true)
            .user_agent(concat!("filemover/", env!("CARGO_PKG_VERSION")))
            .build()?;
        info!(api_url = %api_url, "Initialized MediaWikiClient");
        Ok(Self { http, api_url })
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    async fn get(&self, params: &[(String, String)]) -> Result<Value, ApiError> {
        debug!(api_url = %self.api_url, ?params, "[WIKI] GET");
        let value: Value = self
            .http
            .get(&self.api_url)
            .query(&with_format(params))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        check_api_error(value)
    }

    async fn post(&self, params: &[(String, String)]) -> Result<Value, ApiError> {
        debug!(api_url = %self.api_url, action = ?params.first(), "[WIKI] POST");
        let value: Value = self
            .http
            .post(&self.api_url)
            .form(&with_format(params))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        check_api_error(value)
    }

    /// Run a query, following continuation until the result is complete.
    async fn query_all(&self, base: Params) -> Result<Vec<Value>, ApiError> {
        let mut responses = Vec::new();
        let mut continuation: Params = Vec::new();
        loop {
            let mut request = base.clone();
            request.extend(continuation.iter().cloned());
            let value = self.get(&request).await?;
            continuation = match value.get("continue").and_then(Value::as_object) {
                Some(next) => next
                    .iter()
                    .map(|(k, v)| {
                        let v = v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string());
                        (k.clone(), v)
                    })
                    .collect(),
                None => Vec::new(),
            };
            responses.push(value);
            if continuation.is_empty() {
                return Ok(responses);
            }
        }
    }

    async fn csrf_token(&self) -> Result<String, ApiError> {
        let value = self
            .get(&params(&[("action", "query"), ("meta", "tokens"), ("type", "csrf")]))
            .await?;
        value["query"]["tokens"]["csrftoken"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| "no csrf token in response".into())
    }

    /// The single page a one-title query returned, or an error if it is missing.
    fn only_page<'v>(value: &'v Value, title: &str) -> Result<&'v Value, ApiError> {
        let page = pages(value)
            .next()
            .ok_or_else(|| ApiError::from(format!("no page returned for {title}")))?;
        if page.get("missing").is_some() || page.get("invalid").is_some() {
            return Err(format!("page {title} does not exist").into());
        }
        Ok(page)
    }
}

#[async_trait]
impl Wiki for MediaWikiClient {
    async fn page_text(&self, title: &str) -> Result<String, ApiError> {
        let value = self
            .get(&params(&[
                ("action", "query"),
                ("prop", "revisions"),
                ("rvprop", "content"),
                ("rvslots", "main"),
                ("titles", title),
            ]))
            .await?;
        let page = Self::only_page(&value, title)?;
        page["revisions"][0]["slots"]["main"]["content"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| format!("no content returned for {title}").into())
    }

    async fn edit_page(&self, title: &str, text: &str, summary: &str, append: bool) -> Result<(), ApiError> {
        let token = self.csrf_token().await?;
        let text_field = if append { "appendtext" } else { "text" };
        let value = self
            .post(&params(&[
                ("action", "edit"),
                ("title", title),
                (text_field, text),
                ("summary", summary),
                ("nocreate", "1"),
                ("token", token.as_str()),
            ]))
            .await?;
        match value["edit"]["result"].as_str() {
            Some("Success") => {
                info!(title, append, "[WIKI] Page edited");
                Ok(())
            }
            _ => Err(format!("edit of {title} was not accepted: {}", value["edit"]).into()),
        }
    }

    async fn category_members(&self, category: &str) -> Result<Vec<String>, ApiError> {
        let category = with_namespace("Category:", category);
        let responses = self
            .query_all(params(&[
                ("action", "query"),
                ("list", "categorymembers"),
                ("cmtitle", category.as_str()),
                ("cmtype", "file"),
                ("cmlimit", "max"),
            ]))
            .await?;
        let members: Vec<String> = responses
            .iter()
            .flat_map(|v| v["query"]["categorymembers"].as_array().into_iter().flatten())
            .filter_map(|m| m["title"].as_str().map(str::to_string))
            .collect();
        info!(category = %category, members = members.len(), "[WIKI] Listed category members");
        Ok(members)
    }

    async fn categories_of(&self, titles: &[String]) -> Result<HashMap<String, Vec<String>>, ApiError> {
        let mut categories: HashMap<String, Vec<String>> = HashMap::new();
        for chunk in titles.chunks(MAX_TITLES) {
            let joined = chunk.join("|");
            let responses = self
                .query_all(params(&[
                    ("action", "query"),
                    ("prop", "categories"),
                    ("cllimit", "max"),
                    ("titles", joined.as_str()),
                ]))
                .await?;
            for value in &responses {
                let aliases = normalized(value);
                for page in pages(value) {
                    let Some(title) = page["title"].as_str() else { continue };
                    let key = aliases.get(title).cloned().unwrap_or_else(|| title.to_string());
                    let found = page["categories"]
                        .as_array()
                        .into_iter()
                        .flatten()
                        .filter_map(|c| c["title"].as_str().map(str::to_string));
                    categories.entry(key).or_default().extend(found);
                }
            }
        }
        Ok(categories)
    }

    async fn redirects_to(&self, title: &str) -> Result<Vec<String>, ApiError> {
        let responses = self
            .query_all(params(&[
                ("action", "query"),
                ("prop", "redirects"),
                ("rdlimit", "max"),
                ("titles", title),
            ]))
            .await?;
        Ok(responses
            .iter()
            .flat_map(pages)
            .flat_map(|page| page["redirects"].as_array().into_iter().flatten())
            .filter_map(|r| r["title"].as_str().map(str::to_string))
            .collect())
    }

    async fn exists(&self, titles: &[String]) -> Result<HashMap<String, bool>, ApiError> {
        let mut exists = HashMap::new();
        for chunk in titles.chunks(MAX_TITLES) {
            let joined = chunk.join("|");
            let value = self
                .get(&params(&[("action", "query"), ("titles", joined.as_str())]))
                .await?;
            let aliases = normalized(&value);
            for page in pages(&value) {
                let Some(title) = page["title"].as_str() else { continue };
                let key = aliases.get(title).cloned().unwrap_or_else(|| title.to_string());
                let present = page.get("missing").is_none() && page.get("invalid").is_none();
                exists.insert(key, present);
            }
        }
        Ok(exists)
    }

    async fn find_duplicates_of(&self, titles: &[String]) -> Result<HashMap<String, Vec<String>>, ApiError> {
        let mut duplicates: HashMap<String, Vec<String>> = HashMap::new();
        for chunk in titles.chunks(MAX_TITLES) {
            let joined = chunk.join("|");
            let responses = self
                .query_all(params(&[
                    ("action", "query"),
                    ("prop", "duplicatefiles"),
                    ("dflimit", "max"),
                    ("titles", joined.as_str()),
                ]))
                .await?;
            for value in &responses {
                let aliases = normalized(value);
                for page in pages(value) {
                    let Some(title) = page["title"].as_str() else { continue };
                    let key = aliases.get(title).cloned().unwrap_or_else(|| title.to_string());
                    // Only copies in the shared repository count.
                    let shared = page["duplicatefiles"]
                        .as_array()
                        .into_iter()
                        .flatten()
                        .filter(|d| d["shared"].as_bool().unwrap_or(false))
                        .filter_map(|d| d["name"].as_str())
                        .map(|name| format!("File:{}", name.replace('_', " ")));
                    duplicates.entry(key).or_default().extend(shared);
                }
            }
        }
        Ok(duplicates)
    }

    async fn upload_history_of(&self, title: &str) -> Result<Vec<Revision>, ApiError> {
        let responses = self
            .query_all(params(&[
                ("action", "query"),
                ("prop", "imageinfo"),
                ("iiprop", "timestamp|user|size|comment"),
                ("iilimit", "max"),
                ("titles", title),
            ]))
            .await?;
        let mut revisions = Vec::new();
        for value in &responses {
            let page = Self::only_page(value, title)?;
            for info in page["imageinfo"].as_array().into_iter().flatten() {
                let mut info = info.clone();
                // Hidden users and comments come back without the field.
                for field in ["user", "comment"] {
                    if info.get(field).is_none() {
                        info[field] = Value::String(String::new());
                    }
                }
                revisions.push(serde_json::from_value::<Revision>(info)?);
            }
        }
        revisions.sort_by_key(|r| r.timestamp);
        debug!(title, revisions = revisions.len(), "[WIKI] Fetched upload history");
        Ok(revisions)
    }

    async fn download_binary(&self, title: &str, local_path: &Path) -> Result<(), ApiError> {
        let value = self
            .get(&params(&[
                ("action", "query"),
                ("prop", "imageinfo"),
                ("iiprop", "url"),
                ("titles", title),
            ]))
            .await?;
        let page = Self::only_page(&value, title)?;
        let url = page["imageinfo"][0]["url"]
            .as_str()
            .ok_or_else(|| ApiError::from(format!("no file url for {title}")))?;
        let bytes = self
            .http
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;
        tokio::fs::write(local_path, &bytes).await?;
        info!(title, bytes = bytes.len(), path = %local_path.display(), "[WIKI] Downloaded file");
        Ok(())
    }

    async fn upload_binary(
        &self,
        local_path: &Path,
        dest_title: &str,
        description: &str,
        comment: &str,
    ) -> Result<(), ApiError> {
        let token = self.csrf_token().await?;
        let filename = strip_namespace("File:", dest_title).to_string();
        let bytes = tokio::fs::read(local_path).await?;
        let size = bytes.len();
        let form = Form::new()
            .text("action", "upload")
            .text("format", "json")
            .text("formatversion", "2")
            .text("filename", filename.clone())
            .text("text", description.to_string())
            .text("comment", comment.to_string())
            .text("token", token)
            .part("file", Part::bytes(bytes).file_name(filename));
        let value: Value = self
            .http
            .post(&self.api_url)
            .multipart(form)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        let value = check_api_error(value)?;
        match value["upload"]["result"].as_str() {
            Some("Success") => {
                info!(dest_title, bytes = size, "[WIKI] Uploaded file");
                Ok(())
            }
            _ => Err(format!("upload of {dest_title} was not accepted: {}", value["upload"]).into()),
        }
    }

    async fn parse_tree(&self, raw_text: &str, title_context: &str) -> Result<String, ApiError> {
        let mut request = params(&[
            ("action", "parse"),
            ("prop", "parsetree"),
            ("contentmodel", "wikitext"),
            ("text", raw_text),
        ]);
        if !title_context.is_empty() {
            request.push(("title".to_string(), title_context.to_string()));
        }
        let value = self.post(&request).await?;
        value["parse"]["parsetree"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| "no parse tree in response".into())
    }
}

fn params(pairs: &[(&str, &str)]) -> Params {
    pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
}

fn with_format(params: &[(String, String)]) -> Params {
    let mut all = params.to_vec();
    all.push(("format".to_string(), "json".to_string()));
    all.push(("formatversion".to_string(), "2".to_string()));
    all
}

fn check_api_error(value: Value) -> Result<Value, ApiError> {
    match value.get("error") {
        Some(err) => Err(format!(
            "api error {}: {}",
            err["code"].as_str().unwrap_or("unknown"),
            err["info"].as_str().unwrap_or("")
        )
        .into()),
        None => Ok(value),
    }
}

fn pages(value: &Value) -> impl Iterator<Item = &Value> {
    value["query"]["pages"].as_array().into_iter().flatten()
}

/// Normalised title -> title as requested.
fn normalized(value: &Value) -> HashMap<String, String> {
    value["query"]["normalized"]
        .as_array()
        .into_iter()
        .flatten()
        .filter_map(|n| Some((n["to"].as_str()?.to_string(), n["from"].as_str()?.to_string())))
        .collect()
}

fn with_namespace(namespace: &str, title: &str) -> String {
    let title = title.trim();
    match title.get(..namespace.len()) {
        Some(prefix) if prefix.eq_ignore_ascii_case(namespace) => title.to_string(),
        _ => format!("{namespace}{title}"),
    }
}

fn strip_namespace<'a>(namespace: &str, title: &'a str) -> &'a str {
    let title = title.trim();
    match title.get(..namespace.len()) {
        Some(prefix) if prefix.eq_ignore_ascii_case(namespace) => &title[namespace.len()..],
        _ => title,
    }
}
