//! Document identity resolution
//!
//! Derives a stable file id for a remote drawing regardless of which URL
//! form referenced it. The id is a SHA-256 digest over a canonical
//! `bucket/objectPath` base plus the lowercased display name, so a
//! refreshed access token or a different link dialect for the same object
//! resolves to the same file record.
//!
//! Recognized dialects, tried in order:
//!
//! - `gs://<bucket>/<object>`
//! - `https://<host>/v0/b/<bucket>/o/<percent-encoded object>?alt=media&token=...`
//! - `https://storage.googleapis.com/<bucket>/<object>` and
//!   `https://<bucket>.storage.googleapis.com/<object>`
//!
//! Anything else falls back to the lowercased, query-stripped reference.

use percent_encoding::percent_decode_str;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;

const PUBLIC_STORAGE_HOST: &str = "storage.googleapis.com";

/// Stable identifier of a file record (64 lowercase hex characters)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileId(String);

impl FileId {
    /// Wrap an id that was previously issued by [`resolve_file_id`]
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for FileId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A reference to a remote drawing as the client knows it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentSource {
    pub file_url: String,
    pub file_name: String,
    /// Explicit identity key; bypasses URL canonicalization when present
    #[serde(default)]
    pub override_key: Option<String>,
}

impl DocumentSource {
    pub fn new(file_url: impl Into<String>, file_name: impl Into<String>) -> Self {
        Self {
            file_url: file_url.into(),
            file_name: file_name.into(),
            override_key: None,
        }
    }

    pub fn with_override_key(mut self, key: impl Into<String>) -> Self {
        self.override_key = Some(key.into());
        self
    }

    /// Resolve this source to its stable file id
    pub fn file_id(&self) -> FileId {
        resolve_file_id(&self.file_url, &self.file_name, self.override_key.as_deref())
    }

    /// Canonical base the id is derived from
    pub fn canonical_base(&self) -> String {
        match self.override_key.as_deref() {
            Some(key) if !key.trim().is_empty() => format!("override:{}", key.trim()),
            _ => canonical_base(&self.file_url),
        }
    }
}

/// A storage object located by bucket and object path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectRef {
    pub bucket: String,
    pub object_path: String,
}

impl ObjectRef {
    fn canonical(&self) -> String {
        format!("{}/{}", self.bucket.to_lowercase(), self.object_path)
    }
}

/// A dialect matcher: returns the referenced object, or `None` if the URL is not in its form
type DialectMatcher = fn(&Url) -> Option<ObjectRef>;

const DIALECTS: &[DialectMatcher] = &[match_bucket_scheme, match_rest_download, match_public_object];

/// Resolve a remote reference plus display name to a stable file id
///
/// Never fails: unrecognized references degrade to a best-effort canonical form.
pub fn resolve_file_id(file_url: &str, file_name: &str, override_key: Option<&str>) -> FileId {
    if let Some(key) = override_key.map(str::trim).filter(|k| !k.is_empty()) {
        return FileId(digest_hex(key.as_bytes()));
    }

    let base = canonical_base(file_url);
    let name = file_name.trim().to_lowercase();
    FileId(digest_hex(format!("{}|{}", base, name).as_bytes()))
}

/// Canonical form of a remote reference, ignoring query, fragment and access tokens
pub fn canonical_base(file_url: &str) -> String {
    let stripped = strip_query_and_fragment(file_url.trim());

    if let Some(object) = parse_object_ref(stripped) {
        return object.canonical();
    }

    stripped.to_lowercase()
}

/// Try every known dialect against a reference
pub fn parse_object_ref(reference: &str) -> Option<ObjectRef> {
    let url = Url::parse(strip_query_and_fragment(reference)).ok()?;
    DIALECTS.iter().find_map(|matcher| matcher(&url))
}

fn strip_query_and_fragment(reference: &str) -> &str {
    match reference.find(['?', '#']) {
        Some(idx) => &reference[..idx],
        None => reference,
    }
}

/// `gs://bucket/path/to/object`
fn match_bucket_scheme(url: &Url) -> Option<ObjectRef> {
    if url.scheme() != "gs" {
        return None;
    }
    let bucket = url.host_str()?;
    let object_path = decode(url.path().trim_start_matches('/'));
    object_ref(bucket, object_path)
}

/// `https://host/v0/b/<bucket>/o/<encoded object>`
fn match_rest_download(url: &Url) -> Option<ObjectRef> {
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    let segments: Vec<&str> = url.path_segments()?.collect();
    match segments.as_slice() {
        ["v0", "b", bucket, "o", rest @ ..] if !rest.is_empty() => {
            // Clients occasionally send the object path unencoded
            let object_path = rest.iter().map(|s| decode(s)).collect::<Vec<_>>().join("/");
            object_ref(&decode(bucket), object_path)
        }
        _ => None,
    }
}

/// `https://storage.googleapis.com/<bucket>/<object>` or `https://<bucket>.storage.googleapis.com/<object>`
fn match_public_object(url: &Url) -> Option<ObjectRef> {
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    let host = url.host_str()?.to_lowercase();
    let path = url.path().trim_start_matches('/');

    if host == PUBLIC_STORAGE_HOST {
        let (bucket, object) = path.split_once('/')?;
        return object_ref(bucket, decode(object));
    }

    let bucket = host.strip_suffix(&format!(".{}", PUBLIC_STORAGE_HOST))?;
    object_ref(bucket, decode(path))
}

fn object_ref(bucket: &str, object_path: String) -> Option<ObjectRef> {
    if bucket.is_empty() || object_path.is_empty() {
        return None;
    }
    Some(ObjectRef {
        bucket: bucket.to_string(),
        object_path,
    })
}

fn decode(raw: &str) -> String {
    percent_decode_str(raw).decode_utf8_lossy().into_owned()
}

fn digest_hex(input: &[u8]) -> String {
    hex::encode(Sha256::digest(input))
}
