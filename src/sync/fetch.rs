use std::time::Duration;

use async_trait::async_trait;
use url::Url;

use super::{PtyContent, SessionKey};
use crate::error::FetchError;

/// Response header carrying the stream offset of the first body byte.
pub const PTY_OFFSET_HEADER: &str = "X-PtyDataOffset";

/// Request header carrying the client auth key.
pub const AUTH_KEY_HEADER: &str = "X-AuthKey";

/// Fetches the full retained output of a pty for a reload.
#[async_trait]
pub trait PtyFetcher: Send + Sync {
    async fn fetch(&self, key: &SessionKey) -> Result<PtyContent, FetchError>;
}

/// Fetches pty content from the server's http api.
pub struct HttpPtyFetcher {
    client: reqwest::Client,
    base_url: Url,
    auth_key: Option<String>,
}

impl HttpPtyFetcher {
    /// `timeout` bounds the whole request; `None` leaves fetches unbounded.
    pub fn new(
        base_url: Url,
        auth_key: Option<String>,
        timeout: Option<Duration>,
    ) -> Result<Self, FetchError> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        Ok(Self {
            client: builder.build()?,
            base_url,
            auth_key,
        })
    }

    /// The endpoint a session's content is served from.
    pub fn endpoint(&self, key: &SessionKey) -> Result<Url, FetchError> {
        let mut url = match key {
            SessionKey::Command { .. } => self.base_url.join("api/ptyout")?,
            SessionKey::Remote { .. } => self.base_url.join("api/remote-pty")?,
        };
        {
            let mut query = url.query_pairs_mut();
            match key {
                SessionKey::Command { screen_id, line_id } => {
                    query.append_pair("screenid", screen_id);
                    query.append_pair("lineid", line_id);
                }
                SessionKey::Remote { remote_id } => {
                    query.append_pair("remoteid", remote_id);
                }
            }
        }
        Ok(url)
    }
}

#[async_trait]
impl PtyFetcher for HttpPtyFetcher {
    async fn fetch(&self, key: &SessionKey) -> Result<PtyContent, FetchError> {
        let url = self.endpoint(key)?;
        log::debug!("fetching pty content for {} from {}", key, url);

        let mut request = self.client.get(url);
        if let Some(auth_key) = &self.auth_key {
            request = request.header(AUTH_KEY_HEADER, auth_key);
        }
        let response = request.send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FetchError::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }

        // the server omits the header when the pty has no output yet
        let offset = match response.headers().get(PTY_OFFSET_HEADER) {
            Some(value) => {
                let text = value
                    .to_str()
                    .map_err(|_| FetchError::InvalidOffset(format!("{:?}", value)))?;
                text.trim()
                    .parse::<u64>()
                    .map_err(|_| FetchError::InvalidOffset(text.to_string()))?
            }
            None => 0,
        };
        let data = response.bytes().await?.to_vec();
        log::debug!("fetched {} bytes at offset {} for {}", data.len(), offset, key);
        Ok(PtyContent { offset, data })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one canned http response and hand back the request head.
    async fn serve_once(response: &'static str) -> (Url, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut head = Vec::new();
            let mut chunk = [0u8; 1024];
            while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = stream.read(&mut chunk).await.unwrap();
                if n == 0 {
                    break;
                }
                head.extend_from_slice(&chunk[..n]);
            }
            stream.write_all(response.as_bytes()).await.unwrap();
            stream.shutdown().await.unwrap();
            String::from_utf8_lossy(&head).into_owned()
        });
        let url = Url::parse(&format!("http://{}/", addr)).unwrap();
        (url, handle)
    }

    #[test]
    fn test_endpoints() {
        let base = Url::parse("http://localhost:1619/").unwrap();
        let fetcher = HttpPtyFetcher::new(base, None, None).unwrap();
        let url = fetcher.endpoint(&SessionKey::command("s1", "l1")).unwrap();
        assert_eq!(url.as_str(), "http://localhost:1619/api/ptyout?screenid=s1&lineid=l1");
        let url = fetcher.endpoint(&SessionKey::remote("r 1")).unwrap();
        assert_eq!(url.as_str(), "http://localhost:1619/api/remote-pty?remoteid=r+1");
    }

    #[tokio::test]
    async fn test_fetch_reads_offset_header() {
        let (base, server) = serve_once(
            "HTTP/1.1 200 OK\r\nX-PtyDataOffset: 42\r\nContent-Length: 5\r\nConnection: close\r\n\r\nhello",
        )
        .await;
        let fetcher = HttpPtyFetcher::new(base, Some("secret".to_string()), None).unwrap();
        let content = fetcher.fetch(&SessionKey::command("s1", "l1")).await.unwrap();
        assert_eq!(content, PtyContent { offset: 42, data: b"hello".to_vec() });

        let head = server.await.unwrap().to_lowercase();
        assert!(head.starts_with("get /api/ptyout?screenid=s1&lineid=l1 "));
        assert!(head.contains("x-authkey: secret"));
    }

    #[tokio::test]
    async fn test_fetch_missing_header_means_zero() {
        let (base, _server) =
            serve_once("HTTP/1.1 200 OK\r\nContent-Length: 0\r\nConnection: close\r\n\r\n").await;
        let fetcher = HttpPtyFetcher::new(base, None, None).unwrap();
        let content = fetcher.fetch(&SessionKey::remote("r1")).await.unwrap();
        assert_eq!(content, PtyContent::default());
    }

    #[tokio::test]
    async fn test_fetch_non_success_status() {
        let (base, _server) = serve_once(
            "HTTP/1.1 500 Internal Server Error\r\nContent-Length: 4\r\nConnection: close\r\n\r\nnope",
        )
        .await;
        let fetcher = HttpPtyFetcher::new(base, None, None).unwrap();
        let err = fetcher.fetch(&SessionKey::remote("r1")).await.unwrap_err();
        match err {
            FetchError::HttpStatus { status, body } => {
                assert_eq!(status, 500);
                assert_eq!(body, "nope");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
