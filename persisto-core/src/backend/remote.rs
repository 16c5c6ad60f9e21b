use std::time::Duration;

use reqwest::blocking::{Client, Response};
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};

use crate::utils::{collection_name, truncate_message};
use crate::{CacheEntry, EntryMetadata};

use super::{BackendError, CacheBackend};

const MEMOS_RESOURCE: &str = "memos";
const MAX_ERROR_BODY: usize = 200;

fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

/// Connection settings of a REST document store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Base URL of the server, e.g. `http://localhost:5000`.
    pub endpoint: String,
    /// Timeout applied to every request.
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

impl RemoteConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            timeout: default_timeout(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// One stored result as the document store sees it.
#[derive(Debug, Serialize, Deserialize)]
struct MemoDocument {
    identifier: String,
    funcname: String,
    representation: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    metadata: Option<EntryMetadata>,
    #[serde(rename = "_id", default, skip_serializing)]
    object_id: Option<String>,
    #[serde(rename = "_etag", default, skip_serializing)]
    etag: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CollectionPage {
    #[serde(rename = "_items", default)]
    items: Vec<MemoDocument>,
    #[serde(rename = "_meta", default)]
    meta: Option<PageMeta>,
}

#[derive(Debug, Deserialize)]
struct PageMeta {
    total: usize,
}

/// Client of an Eve-style document store holding one collection per function
/// at `<endpoint>/memos/<function>`.
///
/// Documents are looked up by `identifier`. Inserting a document whose
/// identifier is already present is answered with a conflict by the server,
/// which counts as success here: another process stored the same result
/// first.
#[derive(Debug)]
pub struct RemoteBackend {
    client: Client,
    function: String,
    collection: Url,
}

impl RemoteBackend {
    pub fn new(config: &RemoteConfig, function: &str) -> Result<Self, BackendError> {
        let mut collection = Url::parse(&config.endpoint)
            .map_err(|e| BackendError::Config(format!("invalid endpoint `{}`: {e}", config.endpoint)))?;
        collection
            .path_segments_mut()
            .map_err(|()| {
                BackendError::Config(format!("endpoint `{}` cannot be a base URL", config.endpoint))
            })?
            .pop_if_empty()
            .push(MEMOS_RESOURCE)
            .push(&collection_name(function));

        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| BackendError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            function: function.to_string(),
            collection,
        })
    }

    /// URL of this function's collection.
    pub fn collection_url(&self) -> &Url {
        &self.collection
    }

    fn item_url(&self, segment: &str) -> Url {
        let mut url = self.collection.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.push(segment);
        }
        url
    }

    fn send(&self, request: reqwest::blocking::RequestBuilder) -> Result<Response, BackendError> {
        request
            .send()
            .map_err(|e| BackendError::Transport(e.to_string()))
    }

    fn fetch(&self, id: &str) -> Result<Option<MemoDocument>, BackendError> {
        let url = self.item_url(id);
        tracing::trace!(%url, "fetching document");
        let response = self.send(self.client.get(url))?;

        match response.status() {
            StatusCode::OK => response
                .json()
                .map(Some)
                .map_err(|e| BackendError::Malformed(format!("document `{id}`: {e}"))),
            StatusCode::NOT_FOUND => Ok(None),
            _ => Err(unexpected_status(response)),
        }
    }

    fn fetch_page(&self, page: usize) -> Result<Option<CollectionPage>, BackendError> {
        let mut url = self.collection.clone();
        url.query_pairs_mut().append_pair("page", &page.to_string());
        tracing::trace!(%url, "fetching collection page");
        let response = self.send(self.client.get(url))?;

        match response.status() {
            StatusCode::OK => response
                .json()
                .map(Some)
                .map_err(|e| BackendError::Malformed(format!("collection listing: {e}"))),
            StatusCode::NOT_FOUND => Ok(None),
            _ => Err(unexpected_status(response)),
        }
    }
}

fn unexpected_status(response: Response) -> BackendError {
    let status = response.status().as_u16();
    let body = response.text().unwrap_or_default();
    BackendError::Http {
        status,
        message: truncate_message(&body, MAX_ERROR_BODY),
    }
}

/// Eve reports a duplicate value of a unique field as a validation failure.
fn is_duplicate_rejection(status: StatusCode, body: &str) -> bool {
    status == StatusCode::CONFLICT
        || (status == StatusCode::UNPROCESSABLE_ENTITY && body.contains("unique"))
}

impl CacheBackend for RemoteBackend {
    fn exists(&self, id: &str) -> Result<bool, BackendError> {
        Ok(self.fetch(id)?.is_some())
    }

    fn read(&self, id: &str) -> Result<String, BackendError> {
        self.fetch(id)?
            .map(|document| document.representation)
            .ok_or_else(|| BackendError::NotFound(id.to_string()))
    }

    fn metadata(&self, id: &str) -> Result<Option<EntryMetadata>, BackendError> {
        Ok(self.fetch(id)?.and_then(|document| document.metadata))
    }

    fn write(&self, entry: &CacheEntry) -> Result<(), BackendError> {
        let document = MemoDocument {
            identifier: entry.identifier.clone(),
            funcname: self.function.clone(),
            representation: entry.representation.clone(),
            metadata: Some(entry.metadata.clone()),
            object_id: None,
            etag: None,
        };
        tracing::trace!(url = %self.collection, id = %entry.identifier, "posting document");
        let response = self.send(self.client.post(self.collection.clone()).json(&document))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().unwrap_or_default();
        if is_duplicate_rejection(status, &body) {
            tracing::debug!(id = %entry.identifier, "document already stored by another writer");
            return Ok(());
        }
        Err(BackendError::Http {
            status: status.as_u16(),
            message: truncate_message(&body, MAX_ERROR_BODY),
        })
    }

    fn remove(&self, id: &str) -> Result<bool, BackendError> {
        let Some(document) = self.fetch(id)? else {
            return Ok(false);
        };
        let object_id = document
            .object_id
            .ok_or_else(|| BackendError::Malformed(format!("document `{id}` has no `_id`")))?;

        let url = self.item_url(&object_id);
        tracing::trace!(%url, "deleting document");
        let mut request = self.client.delete(url);
        if let Some(etag) = &document.etag {
            request = request.header(reqwest::header::IF_MATCH, etag);
        }
        let response = self.send(request)?;

        match response.status() {
            status if status.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => Err(unexpected_status(response)),
        }
    }

    fn len(&self) -> Result<usize, BackendError> {
        Ok(match self.fetch_page(1)? {
            Some(page) => page.meta.map_or(page.items.len(), |meta| meta.total),
            None => 0,
        })
    }

    fn clear(&self) -> Result<(), BackendError> {
        tracing::trace!(url = %self.collection, "deleting collection");
        let response = self.send(self.client.delete(self.collection.clone()))?;
        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::NOT_FOUND => Ok(()),
            _ => Err(unexpected_status(response)),
        }
    }

    fn entries(&self) -> Result<Vec<EntryMetadata>, BackendError> {
        let mut entries = Vec::new();
        let mut seen = 0;
        let mut page_number = 1;

        while let Some(page) = self.fetch_page(page_number)? {
            if page.items.is_empty() {
                break;
            }
            seen += page.items.len();
            let total = page.meta.as_ref().map(|meta| meta.total);
            entries.extend(page.items.into_iter().filter_map(|document| document.metadata));

            match total {
                Some(total) if seen < total => page_number += 1,
                _ => break,
            }
        }
        Ok(entries)
    }
}
