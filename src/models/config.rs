use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::models::ArchiverError;

/// Compression applied to entries written by the zip archiver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CompressionLevel {
    /// Store entries as-is
    #[default]
    None,
    /// Deflate level 1
    Fastest,
    /// Deflate level 9
    Optimal,
}

/// Backend selected by [`crate::new_archiver`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ArchiverKind {
    Filesystem,
    Zip,
    Ftp,
    HttpFileServer,
}

/// User name / password pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    pub username: String,
    #[serde(default)]
    pub password: Option<String>,
}

/// HTTP proxy used for every request of an archiver
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxySettings {
    /// Format `http://host:port/`
    pub url: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

/// Options recognized by the HTTP file-server archiver
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpOptions {
    #[serde(default)]
    pub proxy: Option<ProxySettings>,
    #[serde(default)]
    pub basic_auth: Option<Credentials>,
    /// Extra headers sent with every request
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

impl HttpOptions {
    /// Parse options from their JSON form
    ///
    /// # Example
    /// ```ignore
    /// let options = HttpOptions::from_json(r#"{"basicAuth":{"username":"admin","password":"admin123"}}"#)?;
    /// ```
    pub fn from_json(json: &str) -> Result<Self, ArchiverError> {
        serde_json::from_str(json)
            .map_err(|e| ArchiverError::wrap("Invalid HTTP archiver options", e))
    }
}
