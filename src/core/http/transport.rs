use reqwest::blocking::{Client, RequestBuilder};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_LENGTH};
use reqwest::{Method, StatusCode, Url};
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::core::batch::BUFFER_SIZE;
use crate::models::{Credentials, HttpOptions};

const REQUEST_TIMEOUT_SECS: u64 = 1800;

/// Errors returned by an HTTP transport
#[derive(Error, Debug)]
pub enum HttpError {
    #[error("Invalid header {0}")]
    InvalidHeader(String),

    /// The server could not be reached (name resolution, refused connection)
    #[error("Server unreachable: {0}")]
    Unreachable(String),

    #[error("Transfer aborted")]
    Aborted,

    #[error(transparent)]
    Request(reqwest::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for HttpError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_connect() {
            HttpError::Unreachable(error.to_string())
        } else {
            HttpError::Request(error)
        }
    }
}

/// Status line of a response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub reason: String,
}

impl HttpResponse {
    pub fn new(status: u16) -> Self {
        let reason = StatusCode::from_u16(status)
            .ok()
            .and_then(|s| s.canonical_reason())
            .unwrap_or_default()
            .to_string();
        Self { status, reason }
    }
}

/// HTTP requests used by the file-server archiver
///
/// Progress callbacks receive the cumulated bytes transferred for the
/// current file; returning `false` stops the transfer with
/// [`HttpError::Aborted`].
pub trait HttpTransport: Send + Sync {
    /// Size announced by a `HEAD` request, `None` when the file is missing
    fn file_size(&self, url: &Url) -> Result<Option<u64>, HttpError>;

    /// `PUT` the content of `source`
    fn put_file(&self, url: &Url, source: &Path, progress: &mut dyn FnMut(u64) -> bool) -> Result<HttpResponse, HttpError>;

    /// `GET` into `target`; the file is only written on a 200 response
    fn download_file(
        &self,
        url: &Url,
        target: &Path,
        progress: &mut dyn FnMut(u64, Option<u64>) -> bool,
    ) -> Result<HttpResponse, HttpError>;

    fn delete_file(&self, url: &Url) -> Result<HttpResponse, HttpError>;
}

/// Blocking `reqwest` transport honoring proxy, basic authentication and headers
pub struct ReqwestTransport {
    client: Client,
    basic_auth: Option<Credentials>,
}

impl ReqwestTransport {
    pub fn new(options: &HttpOptions) -> Result<Self, HttpError> {
        let mut headers = HeaderMap::new();
        for (name, value) in &options.headers {
            let header_name =
                HeaderName::from_bytes(name.as_bytes()).map_err(|_| HttpError::InvalidHeader(name.clone()))?;
            let header_value = HeaderValue::from_str(value).map_err(|_| HttpError::InvalidHeader(name.clone()))?;
            headers.insert(header_name, header_value);
        }

        let mut builder = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .default_headers(headers);

        if let Some(settings) = &options.proxy {
            let mut proxy = reqwest::Proxy::all(settings.url.as_str()).map_err(HttpError::Request)?;
            if let Some(username) = &settings.username {
                proxy = proxy.basic_auth(username, settings.password.as_deref().unwrap_or_default());
            }
            builder = builder.proxy(proxy);
        }

        Ok(Self {
            client: builder.build().map_err(HttpError::Request)?,
            basic_auth: options.basic_auth.clone(),
        })
    }

    fn request(&self, method: Method, url: &Url) -> RequestBuilder {
        let request = self.client.request(method, url.clone());
        match &self.basic_auth {
            Some(credentials) => request.basic_auth(&credentials.username, credentials.password.as_ref()),
            None => request,
        }
    }
}

impl HttpTransport for ReqwestTransport {
    fn file_size(&self, url: &Url) -> Result<Option<u64>, HttpError> {
        let response = self.request(Method::HEAD, url).send()?;
        if !response.status().is_success() {
            return Ok(None);
        }
        let size = response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(0);
        Ok(Some(size))
    }

    fn put_file(&self, url: &Url, source: &Path, progress: &mut dyn FnMut(u64) -> bool) -> Result<HttpResponse, HttpError> {
        let file = File::open(source)?;
        let length = file.metadata()?.len();
        // the request body owns the file, bytes are reported once sent
        let response = self.request(Method::PUT, url).body(file).send()?;
        progress(length);
        Ok(HttpResponse::new(response.status().as_u16()))
    }

    fn download_file(
        &self,
        url: &Url,
        target: &Path,
        progress: &mut dyn FnMut(u64, Option<u64>) -> bool,
    ) -> Result<HttpResponse, HttpError> {
        let mut response = self.request(Method::GET, url).send()?;
        let status = response.status().as_u16();
        if response.status() != StatusCode::OK {
            return Ok(HttpResponse::new(status));
        }

        let total = response.content_length();
        let mut output = File::create(target)?;
        let mut buffer = vec![0u8; BUFFER_SIZE];
        let mut done = 0u64;
        loop {
            let read = response.read(&mut buffer)?;
            if read == 0 {
                break;
            }
            output.write_all(&buffer[..read])?;
            done += read as u64;
            if !progress(done, total) {
                return Err(HttpError::Aborted);
            }
        }
        output.flush()?;
        Ok(HttpResponse::new(status))
    }

    fn delete_file(&self, url: &Url) -> Result<HttpResponse, HttpError> {
        let response = self.request(Method::DELETE, url).send()?;
        Ok(HttpResponse::new(response.status().as_u16()))
    }
}
