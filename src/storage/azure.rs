//! Azure Blob Storage backend.
//!
//! Each page is uploaded with a single `Put Blob` request:
//!
//! ```text
//! PUT {endpoint}/{container}/{destination…}/{file}[?{sas}]
//! x-ms-blob-type: BlockBlob
//! x-ms-version:   2021-08-06
//! ```
//!
//! Requests are authorised either by a SAS token in the query string or by
//! the account key, which signs each request (`Authorization: SharedKey`).
//! Page images are far below the 5000 MiB single-request limit, so no block
//! list staging is needed. Files are uploaded with bounded concurrency and the
//! first failure aborts the rest.

use super::{blob_name, check_container, destination_segments, file_name_of, list_files, BlobStorage};
use crate::error::StorageError;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use futures::stream::{self, StreamExt, TryStreamExt};
use hmac::{Hmac, Mac};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Url};
use sha2::Sha256;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// REST API version sent with every request.
pub const API_VERSION: &str = "2021-08-06";

const BLOB_TYPE: &str = "BlockBlob";

/// How requests are authorised.
#[derive(Clone)]
pub enum AzureCredential {
    /// Shared access signature, sent as the query string.
    Sas(String),
    /// Decoded account access key, used to sign every request.
    SharedKey(Vec<u8>),
}

impl AzureCredential {
    pub fn sas(token: &str) -> Self {
        AzureCredential::Sas(token.trim_start_matches('?').to_string())
    }

    /// `key` is the base64 account key as shown in the Azure portal.
    pub fn shared_key(key: &str) -> Result<Self, StorageError> {
        BASE64
            .decode(key.trim())
            .map(AzureCredential::SharedKey)
            .map_err(|e| StorageError::Config(format!("account key is not valid base64: {e}")))
    }
}

impl fmt::Debug for AzureCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AzureCredential::Sas(_) => f.write_str("Sas(<redacted>)"),
            AzureCredential::SharedKey(_) => f.write_str("SharedKey(<redacted>)"),
        }
    }
}

pub struct AzureBlobStorage {
    client: Client,
    account: String,
    endpoint: Url,
    credential: AzureCredential,
    concurrency: usize,
}

impl AzureBlobStorage {
    /// Create a client for `account`.
    ///
    /// `endpoint` replaces `https://{account}.blob.core.windows.net`, e.g. for
    /// the Azurite emulator. `timeout` bounds each request.
    pub fn new(
        account: &str,
        credential: AzureCredential,
        endpoint: Option<&str>,
        timeout: Duration,
        concurrency: usize,
    ) -> Result<Self, StorageError> {
        if account.is_empty() && matches!(credential, AzureCredential::SharedKey(_)) {
            return Err(StorageError::Config(
                "shared key authorisation needs the account name".into(),
            ));
        }

        let endpoint = match endpoint {
            Some(e) => e.to_string(),
            None => format!("https://{account}.blob.core.windows.net"),
        };
        let endpoint = Url::parse(&endpoint)
            .map_err(|e| StorageError::Config(format!("endpoint '{endpoint}': {e}")))?;
        if endpoint.cannot_be_a_base() {
            return Err(StorageError::Config(format!(
                "endpoint '{endpoint}' cannot hold a path"
            )));
        }

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| StorageError::Config(e.to_string()))?;

        Ok(Self {
            client,
            account: account.to_string(),
            endpoint,
            credential,
            concurrency: concurrency.max(1),
        })
    }

    /// URL of one blob; carries the SAS token as query string when one is used.
    fn blob_url(&self, container: &str, segments: &[&str], file_name: &str) -> Url {
        let mut url = self.endpoint.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty()
                .push(container)
                .extend(segments)
                .push(file_name);
        }
        if let AzureCredential::Sas(token) = &self.credential {
            if !token.is_empty() {
                url.set_query(Some(token.as_str()));
            }
        }
        url
    }

    async fn put_blob(&self, url: Url, blob: String, file: PathBuf) -> Result<(), StorageError> {
        let body = tokio::fs::read(&file)
            .await
            .map_err(|source| StorageError::Io {
                path: file.clone(),
                source,
            })?;
        let size = body.len();
        let content_type = content_type(&file);

        let mut request = self
            .client
            .put(url.clone())
            .header("x-ms-blob-type", BLOB_TYPE)
            .header("x-ms-version", API_VERSION)
            .header(CONTENT_TYPE, content_type);

        if let AzureCredential::SharedKey(key) = &self.credential {
            let date = chrono::Utc::now()
                .format("%a, %d %b %Y %H:%M:%S GMT")
                .to_string();
            let to_sign = put_blob_string_to_sign(&self.account, &url, size, content_type, &date);
            let signature = sign(key, &to_sign)?;
            request = request
                .header("x-ms-date", date)
                .header(AUTHORIZATION, format!("SharedKey {}:{signature}", self.account));
        }

        let response = request
            .body(body)
            .send()
            .await
            .map_err(|source| StorageError::Request {
                blob: blob.clone(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StorageError::Status {
                blob,
                status: status.as_u16(),
                body,
            });
        }

        debug!("Uploaded {} ({} bytes)", blob, size);
        Ok(())
    }
}

/// Shared Key string-to-sign of a `Put Blob` request.
///
/// Standard headers in their fixed order (only `Content-Length` and
/// `Content-Type` are sent), then the `x-ms-*` headers sorted by name, then
/// `/{account}{path}` followed by the query parameters sorted by name.
fn put_blob_string_to_sign(
    account: &str,
    url: &Url,
    content_length: usize,
    content_type: &str,
    date: &str,
) -> String {
    // An empty body is signed with an empty Content-Length.
    let length = match content_length {
        0 => String::new(),
        n => n.to_string(),
    };
    let mut out = format!("PUT\n\n\n{length}\n\n{content_type}\n\n\n\n\n\n\n");

    for (name, value) in [
        ("x-ms-blob-type", BLOB_TYPE),
        ("x-ms-date", date),
        ("x-ms-version", API_VERSION),
    ] {
        out.push_str(name);
        out.push(':');
        out.push_str(value);
        out.push('\n');
    }

    out.push('/');
    out.push_str(account);
    out.push_str(url.path());

    let mut params: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (k.to_lowercase(), v.into_owned()))
        .collect();
    params.sort();
    for (name, value) in params {
        out.push('\n');
        out.push_str(&name);
        out.push(':');
        out.push_str(&value);
    }
    out
}

/// Base64 HMAC-SHA256 of `string_to_sign` under the decoded account key.
fn sign(key: &[u8], string_to_sign: &str) -> Result<String, StorageError> {
    let mut mac = Hmac::<Sha256>::new_from_slice(key)
        .map_err(|e| StorageError::Config(format!("unusable account key: {e}")))?;
    mac.update(string_to_sign.as_bytes());
    Ok(BASE64.encode(mac.finalize().into_bytes()))
}

#[async_trait]
impl BlobStorage for AzureBlobStorage {
    async fn upload_directory(
        &self,
        container: &str,
        destination: &str,
        local_dir: &Path,
    ) -> Result<(), StorageError> {
        check_container(container)?;
        let segments = destination_segments(destination)?;
        let files = list_files(local_dir).await?;
        let count = files.len();

        let uploads = files
            .into_iter()
            .map(|file| -> Result<_, StorageError> {
                let name = file_name_of(&file)?.to_string();
                let url = self.blob_url(container, &segments, &name);
                let blob = blob_name(container, &segments, &name);
                Ok((url, blob, file))
            })
            .collect::<Result<Vec<_>, _>>()?;

        stream::iter(uploads)
            .map(|(url, blob, file)| self.put_blob(url, blob, file))
            .buffer_unordered(self.concurrency)
            .try_collect::<Vec<()>>()
            .await?;

        info!(
            "Uploaded {} files to {}/{}",
            count,
            container,
            segments.join("/")
        );
        Ok(())
    }
}

fn content_type(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("png") => "image/png",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;

    /// One request as seen by [`serve`].
    #[derive(Debug, Clone)]
    struct Seen {
        method: String,
        target: String,
        blob_type: Option<String>,
        authorization: Option<String>,
        date: Option<String>,
        body_len: usize,
    }

    /// Minimal HTTP/1.1 server answering every request with `status`.
    async fn serve(status: u16) -> (String, Arc<Mutex<Vec<Seen>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = seen.clone();

        tokio::spawn(async move {
            loop {
                let (socket, _) = match listener.accept().await {
                    Ok(conn) => conn,
                    Err(_) => return,
                };
                let log = log.clone();
                tokio::spawn(async move {
                    let mut reader = BufReader::new(socket);
                    let mut line = String::new();
                    reader.read_line(&mut line).await.unwrap();
                    let mut parts = line.split_whitespace();
                    let method = parts.next().unwrap_or_default().to_string();
                    let target = parts.next().unwrap_or_default().to_string();

                    let mut len = 0;
                    let mut blob_type = None;
                    let mut authorization = None;
                    let mut date = None;
                    loop {
                        let mut header = String::new();
                        reader.read_line(&mut header).await.unwrap();
                        let header = header.trim_end();
                        if header.is_empty() {
                            break;
                        }
                        if let Some((k, v)) = header.split_once(':') {
                            match k.to_ascii_lowercase().as_str() {
                                "content-length" => len = v.trim().parse().unwrap(),
                                "x-ms-blob-type" => blob_type = Some(v.trim().to_string()),
                                "authorization" => authorization = Some(v.trim().to_string()),
                                "x-ms-date" => date = Some(v.trim().to_string()),
                                _ => {}
                            }
                        }
                    }
                    let mut body = vec![0; len];
                    reader.read_exact(&mut body).await.unwrap();

                    log.lock().unwrap().push(Seen {
                        method,
                        target,
                        blob_type,
                        authorization,
                        date,
                        body_len: len,
                    });

                    let reply = format!(
                        "HTTP/1.1 {status} X\r\ncontent-length: 4\r\nconnection: close\r\n\r\nnope"
                    );
                    reader.get_mut().write_all(reply.as_bytes()).await.unwrap();
                });
            }
        });

        (format!("http://{addr}/devstoreaccount1"), seen)
    }

    fn page_dir() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("doc(000).jpg"), vec![1u8; 10]).unwrap();
        std::fs::write(dir.path().join("doc(001).jpg"), vec![2u8; 20]).unwrap();
        dir
    }

    fn store(endpoint: &str) -> AzureBlobStorage {
        AzureBlobStorage::new(
            "acct",
            AzureCredential::sas("?sv=1&sig=abc"),
            Some(endpoint),
            Duration::from_secs(5),
            2,
        )
        .unwrap()
    }

    const TEST_KEY: &str = "cGRmMmltYWdlcy10ZXN0LWFjY291bnQta2V5";

    fn shared_key_store(endpoint: &str) -> AzureBlobStorage {
        AzureBlobStorage::new(
            "acct",
            AzureCredential::shared_key(TEST_KEY).unwrap(),
            Some(endpoint),
            Duration::from_secs(5),
            2,
        )
        .unwrap()
    }

    #[test]
    fn default_endpoint_uses_account_name() {
        let s = AzureBlobStorage::new(
            "acct",
            AzureCredential::sas("sig=x"),
            None,
            Duration::from_secs(1),
            1,
        )
        .unwrap();
        let url = s.blob_url("c1", &["p"], "doc(000).jpg");
        assert_eq!(url.host_str(), Some("acct.blob.core.windows.net"));
        assert_eq!(url.path(), "/c1/p/doc(000).jpg");
        assert_eq!(url.query(), Some("sig=x"));
    }

    #[test]
    fn file_names_are_percent_encoded() {
        let s = store("http://127.0.0.1:10000/devstoreaccount1/");
        let url = s.blob_url("c1", &["a b"], "my doc(000).jpg");
        assert_eq!(url.path(), "/devstoreaccount1/c1/a%20b/my%20doc(000).jpg");
    }

    #[test]
    fn content_types() {
        assert_eq!(content_type(Path::new("a.JPG")), "image/jpeg");
        assert_eq!(content_type(Path::new("a.png")), "image/png");
        assert_eq!(content_type(Path::new("a")), "application/octet-stream");
    }

    #[tokio::test]
    async fn uploads_every_file_as_block_blob() {
        let (endpoint, seen) = serve(201).await;
        let dir = page_dir();

        store(&endpoint)
            .upload_directory("c1", "p/", dir.path())
            .await
            .unwrap();

        let mut seen = seen.lock().unwrap().clone();
        seen.sort_by(|a, b| a.target.cmp(&b.target));
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].method, "PUT");
        assert_eq!(
            seen[0].target,
            "/devstoreaccount1/c1/p/doc(000).jpg?sv=1&sig=abc"
        );
        assert_eq!(seen[0].blob_type.as_deref(), Some("BlockBlob"));
        assert_eq!(seen[0].body_len, 10);
        assert_eq!(seen[1].body_len, 20);
    }

    #[tokio::test]
    async fn rejected_upload_reports_status_and_body() {
        let (endpoint, _) = serve(403).await;
        let dir = page_dir();

        let err = store(&endpoint)
            .upload_directory("c1", "p", dir.path())
            .await
            .unwrap_err();
        match err {
            StorageError::Status { status, body, .. } => {
                assert_eq!(status, 403);
                assert_eq!(body, "nope");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn invalid_endpoint_is_a_config_error() {
        let err = AzureBlobStorage::new(
            "acct",
            AzureCredential::sas("sig"),
            Some("not a url"),
            Duration::from_secs(1),
            1,
        )
        .err()
        .unwrap();
        assert!(matches!(err, StorageError::Config(_)));
    }

    #[test]
    fn string_to_sign_of_put_blob() {
        let url = Url::parse("https://acct.blob.core.windows.net/c1/p/doc(000).jpg").unwrap();
        let date = "Mon, 01 Jan 2024 00:00:00 GMT";
        let to_sign = put_blob_string_to_sign("acct", &url, 10, "image/jpeg", date);

        assert_eq!(
            to_sign,
            "PUT\n\n\n10\n\nimage/jpeg\n\n\n\n\n\n\n\
             x-ms-blob-type:BlockBlob\n\
             x-ms-date:Mon, 01 Jan 2024 00:00:00 GMT\n\
             x-ms-version:2021-08-06\n\
             /acct/c1/p/doc(000).jpg"
        );

        let AzureCredential::SharedKey(key) = AzureCredential::shared_key(TEST_KEY).unwrap() else {
            panic!("expected a shared key");
        };
        assert_eq!(key, b"pdf2images-test-account-key");
        assert_eq!(
            sign(&key, &to_sign).unwrap(),
            "0Rvysnz7O3+47YLB5fOoNzjXzYiiF/bxRxexlua3fKU="
        );
    }

    #[test]
    fn empty_body_signs_an_empty_content_length() {
        let url = Url::parse("https://acct.blob.core.windows.net/c1/a.jpg").unwrap();
        let to_sign = put_blob_string_to_sign("acct", &url, 0, "image/jpeg", "d");
        assert!(to_sign.starts_with("PUT\n\n\n\n\nimage/jpeg\n"));
    }

    #[test]
    fn query_parameters_are_signed_sorted() {
        let url = Url::parse("https://acct.blob.core.windows.net/c1/a.jpg?timeout=30&comp=x").unwrap();
        let to_sign = put_blob_string_to_sign("acct", &url, 1, "image/jpeg", "d");
        assert!(to_sign.ends_with("/acct/c1/a.jpg\ncomp:x\ntimeout:30"));
    }

    #[test]
    fn malformed_account_key_is_a_config_error() {
        let err = AzureCredential::shared_key("not base64!").err().unwrap();
        assert!(matches!(err, StorageError::Config(_)));
    }

    #[test]
    fn shared_key_needs_an_account_name() {
        let err = AzureBlobStorage::new(
            "",
            AzureCredential::shared_key(TEST_KEY).unwrap(),
            Some("http://127.0.0.1:10000/devstoreaccount1"),
            Duration::from_secs(1),
            1,
        )
        .err()
        .unwrap();
        assert!(matches!(err, StorageError::Config(_)));
    }

    #[test]
    fn credentials_are_redacted_in_debug() {
        let sas = format!("{:?}", AzureCredential::sas("sig=secret"));
        let key = format!("{:?}", AzureCredential::shared_key(TEST_KEY).unwrap());
        assert_eq!(sas, "Sas(<redacted>)");
        assert_eq!(key, "SharedKey(<redacted>)");
    }

    #[tokio::test]
    async fn shared_key_uploads_are_signed() {
        let (endpoint, seen) = serve(201).await;
        let dir = page_dir();

        shared_key_store(&endpoint)
            .upload_directory("c1", "p", dir.path())
            .await
            .unwrap();

        let seen = seen.lock().unwrap().clone();
        assert_eq!(seen.len(), 2);
        for request in &seen {
            assert!(!request.target.contains('?'), "{}", request.target);
            let auth = request.authorization.as_deref().unwrap();
            assert!(auth.starts_with("SharedKey acct:"), "{auth}");
            assert!(request.date.as_deref().unwrap().ends_with(" GMT"));
        }
    }

    #[tokio::test]
    async fn sas_uploads_carry_no_authorization_header() {
        let (endpoint, seen) = serve(201).await;
        let dir = page_dir();

        store(&endpoint)
            .upload_directory("c1", "p", dir.path())
            .await
            .unwrap();

        for request in seen.lock().unwrap().iter() {
            assert!(request.authorization.is_none());
            assert!(request.date.is_none());
        }
    }
}
