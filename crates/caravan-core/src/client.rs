//! Remote instance collaborators.
//!
//! Migration unit bodies and hooks talk to the target instance through the
//! [`InstanceClient`] trait: an authenticated request/response client over a
//! resource-oriented API. The engine only requires that calls complete in
//! order and that "not found" is distinguishable, which is what unit scripts
//! use to decide create-vs-update idempotently.

use crate::error::{CaravanError, ClientError, Result};
use crate::logbuf::RunLog;
use crate::paths;
use chrono::Utc;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Mutex;

// ---------------------------------------------------------------------------
// InstanceClient
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for Method {
    type Err = CaravanError;
    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Method::Get),
            "POST" => Ok(Method::Post),
            "PUT" => Ok(Method::Put),
            "PATCH" => Ok(Method::Patch),
            "DELETE" => Ok(Method::Delete),
            other => Err(CaravanError::Hook(format!("unknown HTTP method '{other}'"))),
        }
    }
}

pub trait InstanceClient: Send + Sync {
    fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> std::result::Result<Value, ClientError>;

    fn get(&self, path: &str) -> std::result::Result<Value, ClientError> {
        self.request(Method::Get, path, None)
    }

    fn post(&self, path: &str, body: &Value) -> std::result::Result<Value, ClientError> {
        self.request(Method::Post, path, Some(body))
    }

    fn put(&self, path: &str, body: &Value) -> std::result::Result<Value, ClientError> {
        self.request(Method::Put, path, Some(body))
    }

    fn patch(&self, path: &str, body: &Value) -> std::result::Result<Value, ClientError> {
        self.request(Method::Patch, path, Some(body))
    }

    fn delete(&self, path: &str) -> std::result::Result<Value, ClientError> {
        self.request(Method::Delete, path, None)
    }
}

// ---------------------------------------------------------------------------
// HttpInstanceClient
// ---------------------------------------------------------------------------

/// Blocking HTTP implementation with bearer-token auth.
pub struct HttpInstanceClient {
    base_url: String,
    token: Option<String>,
    http: reqwest::blocking::Client,
}

impl HttpInstanceClient {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
            http: reqwest::blocking::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

impl InstanceClient for HttpInstanceClient {
    fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> std::result::Result<Value, ClientError> {
        let url = self.url(path);
        let mut req = match method {
            Method::Get => self.http.get(&url),
            Method::Post => self.http.post(&url),
            Method::Put => self.http.put(&url),
            Method::Patch => self.http.patch(&url),
            Method::Delete => self.http.delete(&url),
        };
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }
        if let Some(body) = body {
            req = req.json(body);
        }

        let resp = req
            .send()
            .map_err(|e| ClientError::Transport(e.to_string()))?;
        let status = resp.status();
        let text = resp
            .text()
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        if status.as_u16() == 404 {
            return Err(ClientError::NotFound(path.to_string()));
        }
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(ClientError::Unauthorized(path.to_string()));
        }
        if !status.is_success() {
            return Err(ClientError::Remote {
                status: status.as_u16(),
                path: path.to_string(),
                body: text,
            });
        }
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(|e| ClientError::Transport(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// ArchiveStore
// ---------------------------------------------------------------------------

/// Bulk configuration import/export collaborator: a named-entry bundle
/// (path → content) shipped to or from an instance. The engine never
/// interprets bundle contents.
pub trait ArchiveStore: Send + Sync {
    fn import(&self, name: &str, entries: &BTreeMap<String, Vec<u8>>) -> Result<()>;
    fn export(&self, name: &str) -> Result<BTreeMap<String, Vec<u8>>>;
}

/// In-memory archive, used in tests and when no upload target is configured.
#[derive(Default)]
pub struct MemoryArchive {
    bundles: Mutex<BTreeMap<String, BTreeMap<String, Vec<u8>>>>,
}

impl MemoryArchive {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bundle_names(&self) -> Vec<String> {
        self.bundles
            .lock()
            .expect("archive poisoned")
            .keys()
            .cloned()
            .collect()
    }
}

impl ArchiveStore for MemoryArchive {
    fn import(&self, name: &str, entries: &BTreeMap<String, Vec<u8>>) -> Result<()> {
        self.bundles
            .lock()
            .expect("archive poisoned")
            .insert(name.to_string(), entries.clone());
        Ok(())
    }

    fn export(&self, name: &str) -> Result<BTreeMap<String, Vec<u8>>> {
        self.bundles
            .lock()
            .expect("archive poisoned")
            .get(name)
            .cloned()
            .ok_or_else(|| CaravanError::Archive(format!("bundle not found: {name}")))
    }
}

/// Ship the log slice since the last checkpoint to the instance as a plain
/// text artifact. Returns the entry path written into the bundle.
pub fn upload_log_artifact(
    archive: &dyn ArchiveStore,
    log: &RunLog,
    label: &str,
) -> Result<String> {
    let stamp = Utc::now().format("%Y%m%dT%H%M%SZ");
    let entry = format!("{}/caravan-{label}-{stamp}.log", paths::LOG_ARTIFACT_DIR);
    let mut text = log.since_mark().join("\n");
    if !text.is_empty() {
        text.push('\n');
    }
    let mut entries = BTreeMap::new();
    entries.insert(entry.clone(), text.into_bytes());
    archive.import(&entry, &entries)?;
    Ok(entry)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
