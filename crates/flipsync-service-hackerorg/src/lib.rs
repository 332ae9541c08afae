// # hacker.org Puzzle Service
//
// PuzzleService implementation for the hacker.org "cross" flip puzzle.
//
// ## Behavior
//
// - One HTTP POST per call, nothing else
// - Credentials travel as form fields in the request body, never in the URL
// - Errors propagate to the engine, which owns retries and backoff
// - No caching and no background tasks
//
// ## Page Format
//
// The puzzle page embeds its state in an initialization script:
//
// ```text
// <script>var boardinit = "1001,1220"; var level = 10;</script>
// ```
//
// Extraction is a pure function ([`extract_puzzle`]) so it can be tested
// without a server.
//
// ## Security Requirements
//
// - Password NEVER appears in logs, errors or URLs
// - Credentials MUST be provided via environment variables only
// - Construction fails fast if either credential is empty

use async_trait::async_trait;
use flipsync_core::config::{Credentials, ServiceConfig};
use flipsync_core::traits::{
    FetchOutcome, FetchedPuzzle, MissingField, PuzzleService, SubmitOutcome,
};
use flipsync_core::{Error, Result};
use std::time::Duration;

/// Opening of the initialization script
const SCRIPT_START: &str = "<script>var boardinit";

/// End of the initialization script
const SCRIPT_END: &str = "</script>";

/// Prefix of the quoted board token inside the script
const BOARD_KEY: &str = "boardinit = \"";

/// Prefix of the level number inside the script
const LEVEL_KEY: &str = "level = ";

/// Extract the current puzzle from a puzzle page
///
/// Returns `NotFound` with the first missing piece: the script fragment
/// itself, the board token, or the level number. An empty board token counts
/// as missing.
///
/// # Example
///
/// ```rust
/// use flipsync_core::traits::FetchOutcome;
/// use flipsync_service_hackerorg::extract_puzzle;
///
/// let page = r#"<script>var boardinit = "1001,1220"; var level = 10;</script>"#;
/// match extract_puzzle(page) {
///     FetchOutcome::Puzzle(puzzle) => assert_eq!(puzzle.level, 10),
///     FetchOutcome::NotFound(missing) => panic!("{}", missing),
/// }
/// ```
pub fn extract_puzzle(html: &str) -> FetchOutcome {
    let Some(fragment) = script_fragment(html) else {
        return FetchOutcome::NotFound(MissingField::Fragment);
    };

    let Some(board) = quoted_after(fragment, BOARD_KEY).filter(|b| !b.is_empty()) else {
        return FetchOutcome::NotFound(MissingField::BoardState);
    };

    let Some(level) = number_after(fragment, LEVEL_KEY) else {
        return FetchOutcome::NotFound(MissingField::Level);
    };

    FetchOutcome::Puzzle(FetchedPuzzle::new(level, board))
}

/// Whether a submit response acknowledges the solution
pub fn is_accepted(body: &str, success_marker: &str) -> bool {
    body.contains(success_marker)
}

fn script_fragment(html: &str) -> Option<&str> {
    let start = html.find(SCRIPT_START)?;
    let rest = &html[start..];
    let end = rest.find(SCRIPT_END)?;
    Some(&rest[..end])
}

fn quoted_after<'a>(text: &'a str, key: &str) -> Option<&'a str> {
    let start = text.find(key)? + key.len();
    let rest = &text[start..];
    let end = rest.find('"')?;
    Some(&rest[..end])
}

fn number_after(text: &str, key: &str) -> Option<u32> {
    let start = text.find(key)? + key.len();
    let rest = &text[start..];
    let end = rest
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(rest.len());
    // Empty or overflowing digit runs both count as missing
    rest[..end].parse().ok()
}

/// hacker.org puzzle service client
///
/// The Debug implementation intentionally does NOT expose the password.
pub struct HackerOrgService {
    /// Puzzle endpoint, used for fetch and submit
    url: String,

    /// Literal marking an accepted submission
    success_marker: String,

    /// Account credentials
    /// ⚠️ NEVER log the password
    credentials: Credentials,

    /// HTTP client with the configured timeout
    client: reqwest::Client,
}

impl std::fmt::Debug for HackerOrgService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HackerOrgService")
            .field("url", &self.url)
            .field("success_marker", &self.success_marker)
            .field("username", &self.credentials.username)
            .field("password", &"<REDACTED>")
            .finish()
    }
}

impl HackerOrgService {
    /// Create a new client
    ///
    /// # Errors
    ///
    /// Returns a configuration error if either credential is empty or the
    /// HTTP client cannot be built.
    pub fn new(
        url: impl Into<String>,
        success_marker: impl Into<String>,
        credentials: Credentials,
        timeout: Duration,
    ) -> Result<Self> {
        credentials.validate()?;

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            url: url.into(),
            success_marker: success_marker.into(),
            credentials,
            client,
        })
    }

    /// Create a client from service configuration
    pub fn from_config(config: &ServiceConfig, credentials: Credentials) -> Result<Self> {
        config.validate()?;
        Self::new(
            config.url.clone(),
            config.success_marker.clone(),
            credentials,
            Duration::from_secs(config.timeout_secs),
        )
    }

    /// POST the credentials plus `fields` and return the response body
    async fn post_form(&self, fields: &[(&str, &str)]) -> Result<String> {
        let mut form = vec![
            ("name", self.credentials.username.as_str()),
            ("password", self.credentials.password.as_str()),
        ];
        form.extend_from_slice(fields);

        let response = self
            .client
            .post(&self.url)
            .form(&form)
            .send()
            .await
            .map_err(|e| Error::transport(format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return match status.as_u16() {
                401 | 403 => Err(Error::config(format!(
                    "Authentication failed: check FLIPSYNC_USERNAME/FLIPSYNC_PASSWORD. Status: {}",
                    status
                ))),
                429 => Err(Error::transport(format!(
                    "Rate limit exceeded. Status: {}",
                    status
                ))),
                500..=599 => Err(Error::transport(format!(
                    "Puzzle server error (transient). Status: {}",
                    status
                ))),
                _ => Err(Error::transport(format!(
                    "Unexpected HTTP status: {}",
                    status
                ))),
            };
        }

        response
            .text()
            .await
            .map_err(|e| Error::transport(format!("Failed to read response body: {}", e)))
    }
}

#[async_trait]
impl PuzzleService for HackerOrgService {
    async fn fetch_current_puzzle(&self) -> Result<FetchOutcome> {
        tracing::debug!("Fetching current puzzle from {}", self.url);

        let body = self.post_form(&[]).await?;
        let outcome = extract_puzzle(&body);

        match &outcome {
            FetchOutcome::Puzzle(puzzle) => {
                tracing::debug!(
                    "Page shows level {} ({} byte board)",
                    puzzle.level,
                    puzzle.board_state.len()
                );
            }
            FetchOutcome::NotFound(missing) => {
                tracing::warn!("Puzzle page ({} bytes): {}", body.len(), missing);
            }
        }

        Ok(outcome)
    }

    async fn submit_solution(&self, level: u32, solution: &str) -> Result<SubmitOutcome> {
        tracing::info!("Submitting solution for level {}", level);

        let level = level.to_string();
        let body = self
            .post_form(&[("lvl", level.as_str()), ("sol", solution)])
            .await?;

        if is_accepted(&body, &self.success_marker) {
            Ok(SubmitOutcome::Accepted)
        } else {
            tracing::debug!(
                "Submit response for level {} lacks {:?}",
                level,
                self.success_marker
            );
            Ok(SubmitOutcome::Rejected)
        }
    }

    fn service_name(&self) -> &'static str {
        "hacker.org"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::task::JoinHandle;

    const PAGE: &str = r#"<html><body>
<table id="board"></table>
<script>var boardinit = "1001,1220"; var level = 10;</script>
</body></html>"#;

    fn credentials() -> Credentials {
        Credentials::new("alice", "s3cret")
    }

    fn service(url: &str) -> HackerOrgService {
        HackerOrgService::new(url, "Congratulations", credentials(), Duration::from_secs(5))
            .expect("service builds")
    }

    /// Read one HTTP request: headers plus a Content-Length body
    async fn read_request(socket: &mut TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let n = socket.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);

            let text = String::from_utf8_lossy(&buf);
            if let Some(header_end) = text.find("\r\n\r\n") {
                let content_length = text[..header_end]
                    .lines()
                    .find_map(|line| {
                        let (name, value) = line.split_once(':')?;
                        if name.eq_ignore_ascii_case("content-length") {
                            value.trim().parse::<usize>().ok()
                        } else {
                            None
                        }
                    })
                    .unwrap_or(0);
                if buf.len() >= header_end + 4 + content_length {
                    break;
                }
            }
        }
        String::from_utf8_lossy(&buf).into_owned()
    }

    /// Serve a single response and hand back the raw request
    async fn serve_once(status: &'static str, body: &'static str) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let request = read_request(&mut socket).await;
            let response = format!(
                "HTTP/1.1 {}\r\nContent-Type: text/html\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            let _ = socket.shutdown().await;
            request
        });

        (format!("http://{}/cross/index.php", addr), handle)
    }

    #[test]
    fn extracts_board_and_level() {
        assert_eq!(
            extract_puzzle(PAGE),
            FetchOutcome::Puzzle(FetchedPuzzle::new(10, "1001,1220"))
        );
    }

    #[test]
    fn page_without_script_is_missing_fragment() {
        let login_page = "<html><form action=\"/login\"></form></html>";
        assert_eq!(
            extract_puzzle(login_page),
            FetchOutcome::NotFound(MissingField::Fragment)
        );

        // Opened but never closed
        assert_eq!(
            extract_puzzle("<script>var boardinit = \"1\"; var level = 2;"),
            FetchOutcome::NotFound(MissingField::Fragment)
        );
    }

    #[test]
    fn script_without_board_is_missing_board() {
        let page = "<script>var boardinit = 0; var level = 3;</script>";
        assert_eq!(
            extract_puzzle(page),
            FetchOutcome::NotFound(MissingField::BoardState)
        );

        let empty = "<script>var boardinit = \"\"; var level = 3;</script>";
        assert_eq!(
            extract_puzzle(empty),
            FetchOutcome::NotFound(MissingField::BoardState)
        );
    }

    #[test]
    fn script_without_numeric_level_is_missing_level() {
        for page in [
            "<script>var boardinit = \"01\";</script>",
            "<script>var boardinit = \"01\"; var level = x;</script>",
            "<script>var boardinit = \"01\"; var level = 99999999999;</script>",
        ] {
            assert_eq!(
                extract_puzzle(page),
                FetchOutcome::NotFound(MissingField::Level),
                "page: {}",
                page
            );
        }
    }

    #[test]
    fn level_outside_the_script_is_ignored() {
        let page = "<p>level = 4</p><script>var boardinit = \"01\";</script>";
        assert_eq!(
            extract_puzzle(page),
            FetchOutcome::NotFound(MissingField::Level)
        );
    }

    #[test]
    fn acceptance_is_a_substring_match() {
        assert!(is_accepted("<h1>Congratulations!</h1>", "Congratulations"));
        assert!(!is_accepted("<h1>Wrong answer</h1>", "Congratulations"));
        assert!(!is_accepted("congratulations", "Congratulations"));
    }

    #[test]
    fn empty_credentials_are_rejected() {
        let result = HackerOrgService::new(
            "http://localhost/",
            "Congratulations",
            Credentials::new("alice", ""),
            Duration::from_secs(5),
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = ServiceConfig {
            url: "ftp://example.com".to_string(),
            ..ServiceConfig::default()
        };
        assert!(HackerOrgService::from_config(&config, credentials()).is_err());
        assert!(HackerOrgService::from_config(&ServiceConfig::default(), credentials()).is_ok());
    }

    #[test]
    fn password_not_exposed_in_debug() {
        let debug_str = format!("{:?}", service("http://localhost/"));
        assert!(!debug_str.contains("s3cret"));
        assert!(debug_str.contains("alice"));
        assert!(debug_str.contains("HackerOrgService"));
    }

    #[tokio::test]
    async fn fetch_posts_credentials_in_body() {
        let (url, server) = serve_once("200 OK", PAGE).await;

        let outcome = service(&url).fetch_current_puzzle().await.unwrap();
        assert_eq!(
            outcome,
            FetchOutcome::Puzzle(FetchedPuzzle::new(10, "1001,1220"))
        );

        let request = server.await.unwrap();
        let request_line = request.lines().next().unwrap();
        assert_eq!(request_line, "POST /cross/index.php HTTP/1.1");
        assert!(!request_line.contains("s3cret"));
        assert!(request.ends_with("name=alice&password=s3cret"));
    }

    #[tokio::test]
    async fn submit_sends_level_and_solution() {
        let (url, server) = serve_once("200 OK", "<p>Congratulations, level solved</p>").await;

        let outcome = service(&url).submit_solution(10, "RRLDU").await.unwrap();
        assert_eq!(outcome, SubmitOutcome::Accepted);

        let request = server.await.unwrap();
        assert!(request.ends_with("name=alice&password=s3cret&lvl=10&sol=RRLDU"));
    }

    #[tokio::test]
    async fn submit_without_marker_is_rejected() {
        let (url, _server) = serve_once("200 OK", "<p>That is not right</p>").await;

        let outcome = service(&url).submit_solution(10, "RRLDU").await.unwrap();
        assert_eq!(outcome, SubmitOutcome::Rejected);
    }

    #[tokio::test]
    async fn server_error_is_a_transport_failure() {
        let (url, _server) = serve_once("503 Service Unavailable", "busy").await;

        let err = service(&url).fetch_current_puzzle().await.unwrap_err();
        assert!(matches!(err, Error::Transport(_)), "got {:?}", err);
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn unreachable_server_is_a_transport_failure() {
        // Bind then drop to get a port nobody listens on
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = service(&format!("http://{}/", addr))
            .fetch_current_puzzle()
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Transport(_)), "got {:?}", err);
        assert!(!err.to_string().contains("s3cret"));
    }
}
