//! HTTP fetcher implementation
//!
//! This module handles all HTTP requests for the crawler, including:
//! - Building HTTP clients from the crawl's options (user agent, timeouts, proxy)
//! - Manual redirect following with loop detection and a hop limit
//! - Basic authentication
//! - Error classification into structured error content
//!
//! Fetch failures never escape as errors unless the crawl runs in strict
//! mode (`raise_exceptions`).

use crate::config::CrawlOptions;
use crate::crawler::content::{
    is_text_type, split_content_type, Content, REDIRECT_ERROR, SERVER_DOWN, SOCKET_ERROR,
};
use crate::crawler::request::ContentRequest;
use crate::url::normalize_url;
use crate::{Result, SpindleError};
use async_trait::async_trait;
use reqwest::{redirect::Policy, Client, Proxy, Response};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;
use std::time::Instant;
use url::Url;

/// Retrieves content for a crawl job
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetches the job's url under the job's crawl options
    ///
    /// # Returns
    ///
    /// * `Ok(Content)` - The response, or structured error content
    /// * `Err(SpindleError)` - Only in strict mode, or for an unusable url
    async fn fetch(&self, request: &ContentRequest) -> Result<Content>;
}

/// Classified fetch failure
#[derive(Debug, Clone, PartialEq)]
enum FetchFailure {
    Redirect(String),
    Socket(String),
    Timeout(String),
}

impl FetchFailure {
    fn from_reqwest(e: &reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout(e.to_string())
        } else if e.is_redirect() {
            Self::Redirect(e.to_string())
        } else {
            Self::Socket(e.to_string())
        }
    }

    fn mime_type(&self) -> &'static str {
        match self {
            Self::Redirect(_) => REDIRECT_ERROR,
            Self::Socket(_) => SOCKET_ERROR,
            Self::Timeout(_) => SERVER_DOWN,
        }
    }

    fn message(&self) -> &str {
        match self {
            Self::Redirect(m) | Self::Socket(m) | Self::Timeout(m) => m,
        }
    }
}

/// Builds an HTTP client for a crawl's options
///
/// Redirects are disabled so they can be followed (and recorded) manually.
/// Certificate errors are ignored, as crawls routinely meet misconfigured
/// hosts.
///
/// # Arguments
///
/// * `options` - The crawl options
///
/// # Returns
///
/// * `Ok(Client)` - Successfully built HTTP client
/// * `Err(SpindleError)` - Invalid proxy settings or TLS backend failure
pub fn build_http_client(options: &CrawlOptions) -> Result<Client> {
    let timeout = options.timeout();
    let mut builder = Client::builder()
        .user_agent(options.user_agent.clone())
        .timeout(timeout)
        .connect_timeout(timeout / 2)
        .redirect(Policy::none())
        .danger_accept_invalid_certs(true)
        .gzip(true)
        .brotli(true);

    if let (Some(addr), Some(port)) = (&options.proxy_addr, options.proxy_port) {
        let mut proxy = Proxy::all(format!("http://{}:{}", addr, port))?;
        if let Some(username) = &options.proxy_username {
            proxy = proxy.basic_auth(username, options.proxy_password.as_deref().unwrap_or(""));
        }
        builder = builder.proxy(proxy);
    }

    Ok(builder.build()?)
}

fn client_key(options: &CrawlOptions) -> String {
    format!(
        "{}|{}|{:?}:{:?}|{:?}",
        options.user_agent,
        options.timeout,
        options.proxy_addr,
        options.proxy_port,
        options.proxy_username
    )
}

/// Fetcher over reqwest, reusing one client per distinct client setup
#[derive(Default)]
pub struct HttpFetcher {
    clients: Mutex<HashMap<String, Client>>,
}

impl HttpFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    fn client_for(&self, options: &CrawlOptions) -> Result<Client> {
        let key = client_key(options);
        let mut clients = self
            .clients
            .lock()
            .map_err(|e| SpindleError::Processing(format!("client cache poisoned: {}", e)))?;
        if let Some(client) = clients.get(&key) {
            return Ok(client.clone());
        }
        let client = build_http_client(options)?;
        clients.insert(key, client.clone());
        Ok(client)
    }

    async fn retrieve(
        &self,
        client: &Client,
        url: &Url,
        options: &CrawlOptions,
        started: Instant,
    ) -> std::result::Result<Content, FetchFailure> {
        let mut current = url.clone();
        let mut hops: Vec<String> = Vec::new();
        let mut seen: HashSet<String> = HashSet::from([current.to_string()]);

        loop {
            let mut request = client.get(current.clone());
            if let (Some(username), Some(password)) = (&options.username, &options.password) {
                request = request.basic_auth(username, Some(password));
            }

            let response = request
                .send()
                .await
                .map_err(|e| FetchFailure::from_reqwest(&e))?;

            if options.follow_redirects && response.status().is_redirection() {
                if let Some(location) = header_value(&response, reqwest::header::LOCATION) {
                    let mut next = current.join(&location).map_err(|e| {
                        FetchFailure::Redirect(format!("bad Location '{}': {}", location, e))
                    })?;
                    next.set_fragment(None);

                    if hops.len() >= options.redirect_limit as usize {
                        return Err(FetchFailure::Redirect(format!(
                            "redirect limit of {} exceeded at {}",
                            options.redirect_limit, next
                        )));
                    }
                    if !seen.insert(next.to_string()) {
                        return Err(FetchFailure::Redirect(format!(
                            "redirect loop detected at {}",
                            next
                        )));
                    }

                    tracing::debug!("Redirect {} -> {}", current, next);
                    hops.push(next.to_string());
                    current = next;
                    continue;
                }
            }

            return build_content(response, url, hops, options, started).await;
        }
    }
}

fn header_value(response: &Response, name: reqwest::header::HeaderName) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

async fn build_content(
    response: Response,
    requested: &Url,
    redirect_through: Vec<String>,
    options: &CrawlOptions,
    started: Instant,
) -> std::result::Result<Content, FetchFailure> {
    let status_code = response.status().as_u16();
    let final_url = response.url().to_string();

    let headers: BTreeMap<String, String> = response
        .headers()
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        })
        .collect();

    let (mime_type, character_set) =
        split_content_type(headers.get("content-type").map_or("", String::as_str));
    let location = headers.get("location").cloned();
    let declared_length = headers
        .get("content-length")
        .and_then(|l| l.trim().parse::<u64>().ok());

    let bytes = response
        .bytes()
        .await
        .map_err(|e| FetchFailure::from_reqwest(&e))?;

    Ok(Content {
        url: final_url,
        base_url: requested.to_string(),
        status_code,
        text_content: is_text_type(&mime_type, options),
        mime_type,
        character_set,
        headers,
        length: declared_length.unwrap_or(bytes.len() as u64),
        body: String::from_utf8_lossy(&bytes).into_owned(),
        location,
        redirect_through,
        response_time: started.elapsed().as_secs_f64(),
        error: None,
    })
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: &ContentRequest) -> Result<Content> {
        let options = &request.options;
        let url = normalize_url(&request.url)?;
        let client = self.client_for(options)?;
        let started = Instant::now();

        match self.retrieve(&client, &url, options, started).await {
            Ok(content) => {
                tracing::debug!(
                    "Fetched {} ({}, {}, {} bytes)",
                    url,
                    content.status_code,
                    content.mime_type,
                    content.length
                );
                Ok(content)
            }
            Err(failure) => {
                if options.raise_exceptions {
                    return Err(SpindleError::Fetch {
                        url: url.to_string(),
                        message: failure.message().to_string(),
                    });
                }
                tracing::error!("Fetch failed for {}: {}", url, failure.message());
                Ok(Content::error(
                    url.as_str(),
                    failure.mime_type(),
                    failure.message(),
                    started.elapsed().as_secs_f64(),
                ))
            }
        }
    }
}
