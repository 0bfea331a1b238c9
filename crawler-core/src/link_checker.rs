use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use reqwest::StatusCode;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::domain::Link;
use crate::robots::RobotsCache;

const FAN_OUT: usize = 12;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Bounded-concurrency HEAD/GET prober. `check` mutates each link's
/// `status_code` in place, preserving order and arity.
pub struct LinkChecker {
    client: reqwest::Client,
    robots: Arc<RobotsCache>,
}

impl LinkChecker {
    pub fn new(client: reqwest::Client, robots: Arc<RobotsCache>) -> Self {
        Self { client, robots }
    }

    pub async fn check(&self, links: &mut [Link], token: CancellationToken) {
        let codes: Vec<AtomicU16> = (0..links.len()).map(|_| AtomicU16::new(0)).collect();
        let codes = &codes;
        let client = &self.client;
        let robots = &self.robots;

        stream::iter(links.iter().enumerate())
            .for_each_concurrent(FAN_OUT, |(i, link)| {
                let token = token.clone();
                async move {
                    if token.is_cancelled() {
                        return;
                    }
                    let code = check_one(client, robots, &link.href).await;
                    codes[i].store(code, Ordering::Relaxed);
                }
            })
            .await;

        for (link, code) in links.iter_mut().zip(codes.iter()) {
            link.status_code = code.load(Ordering::Relaxed);
        }
    }
}

async fn check_one(client: &reqwest::Client, robots: &RobotsCache, href: &str) -> u16 {
    let Ok(url) = Url::parse(href) else {
        return 0;
    };
    let host = url.host_str().unwrap_or_default();
    if !robots.allowed(url.scheme(), host, url.path()).await {
        return StatusCode::FORBIDDEN.as_u16();
    }

    match client
        .head(url.clone())
        .timeout(REQUEST_TIMEOUT)
        .send()
        .await
    {
        Ok(resp) if resp.status() == StatusCode::METHOD_NOT_ALLOWED => {
            match client.get(url).timeout(REQUEST_TIMEOUT).send().await {
                Ok(resp) => resp.status().as_u16(),
                Err(_) => 0,
            }
        }
        Ok(resp) => resp.status().as_u16(),
        Err(_) => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn link(href: &str) -> Link {
        Link {
            href: href.to_owned(),
            is_external: false,
            status_code: 0,
        }
    }

    #[tokio::test]
    async fn records_status_codes() {
        let mut server = mockito::Server::new_async().await;
        let _ok = server.mock("HEAD", "/ok").with_status(200).create_async().await;
        let _missing = server
            .mock("HEAD", "/missing")
            .with_status(404)
            .create_async()
            .await;

        let robots = Arc::new(RobotsCache::new(reqwest::Client::new()));
        let checker = LinkChecker::new(reqwest::Client::new(), robots);
        let mut links = vec![
            link(&format!("{}/ok", server.url())),
            link(&format!("{}/missing", server.url())),
        ];
        checker.check(&mut links, CancellationToken::new()).await;
        assert_eq!(links[0].status_code, 200);
        assert_eq!(links[1].status_code, 404);
    }

    #[tokio::test]
    async fn retries_head_not_allowed_with_get() {
        let mut server = mockito::Server::new_async().await;
        let _head = server
            .mock("HEAD", "/page")
            .with_status(405)
            .create_async()
            .await;
        let _get = server
            .mock("GET", "/page")
            .with_status(200)
            .create_async()
            .await;

        let robots = Arc::new(RobotsCache::new(reqwest::Client::new()));
        let checker = LinkChecker::new(reqwest::Client::new(), robots);
        let mut links = vec![link(&format!("{}/page", server.url()))];
        checker.check(&mut links, CancellationToken::new()).await;
        assert_eq!(links[0].status_code, 200);
    }

    #[tokio::test]
    async fn transport_error_maps_to_zero() {
        let robots = Arc::new(RobotsCache::new(reqwest::Client::new()));
        let checker = LinkChecker::new(reqwest::Client::new(), robots);
        let mut links = vec![link("http://127.0.0.1:1/unreachable")];
        checker.check(&mut links, CancellationToken::new()).await;
        assert_eq!(links[0].status_code, 0);
    }
}
