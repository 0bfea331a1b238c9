use dashmap::DashMap;
use robots_txt::Robots;

/// Per-host memoized robots.txt policy.
///
/// A miss fetches `scheme://host/robots.txt`; any transport, parse, or
/// non-2xx failure stores `None` for the host (fail-open) rather than
/// retrying on every subsequent lookup.
pub struct RobotsCache {
    client: reqwest::Client,
    cache: DashMap<String, Option<String>>,
}

const USER_AGENT: &str = "*";

/// Matches a robots.txt `Disallow` pattern against a request path, supporting
/// the `*` wildcard and a trailing `$` end-anchor.
fn path_matches(pattern: &str, mut path: &str) -> bool {
    if pattern.is_empty() {
        return false;
    }
    let (pattern, anchored) = match pattern.strip_suffix('$') {
        Some(stripped) => (stripped, true),
        None => (pattern, false),
    };
    for segment in pattern.split('*') {
        match path.find(segment) {
            Some(at) => path = &path[at + segment.len()..],
            None => return false,
        }
    }
    !anchored || path.is_empty()
}

impl RobotsCache {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            cache: DashMap::new(),
        }
    }

    /// Returns whether `path` on `host` may be fetched. Fails open: any
    /// error retrieving or parsing robots.txt is treated as "allowed".
    pub async fn allowed(&self, scheme: &str, host: &str, path: &str) -> bool {
        if host.is_empty() {
            return true;
        }

        if let Some(entry) = self.cache.get(host) {
            return Self::evaluate(entry.value(), path);
        }

        let body = self.fetch(scheme, host).await;
        let allowed = Self::evaluate(&body, path);
        self.cache.insert(host.to_owned(), body);
        allowed
    }

    async fn fetch(&self, scheme: &str, host: &str) -> Option<String> {
        let url = format!("{scheme}://{host}/robots.txt");
        let response = self.client.get(&url).send().await.ok()?;
        if !response.status().is_success() {
            return None;
        }
        response.text().await.ok()
    }

    fn evaluate(body: &Option<String>, path: &str) -> bool {
        let Some(body) = body else {
            // fail-open: no cached policy, or the fetch failed earlier.
            return true;
        };
        let robots = Robots::from_str_lossy(body);
        let section = robots.choose_section(USER_AGENT);
        !section
            .rules
            .iter()
            .filter(|rule| !rule.allow)
            .any(|rule| path_matches(&rule.path, path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_host_is_always_allowed() {
        let cache = RobotsCache::new(reqwest::Client::new());
        assert!(cache.allowed("http", "", "/anything").await);
    }

    #[tokio::test]
    async fn fail_open_on_5xx() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/robots.txt")
            .with_status(500)
            .create_async()
            .await;
        let host = server.host_with_port();
        let cache = RobotsCache::new(reqwest::Client::new());
        assert!(cache.allowed("http", &host, "/private").await);
    }

    #[tokio::test]
    async fn disallowed_path_is_denied() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/robots.txt")
            .with_status(200)
            .with_body("User-agent: *\nDisallow: /private\n")
            .create_async()
            .await;
        let host = server.host_with_port();
        let cache = RobotsCache::new(reqwest::Client::new());
        assert!(!cache.allowed("http", &host, "/private").await);
        assert!(cache.allowed("http", &host, "/public").await);
    }

    #[tokio::test]
    async fn caches_decision_after_first_fetch() {
        let mut server = mockito::Server::new_async().await;
        let m = server
            .mock("GET", "/robots.txt")
            .with_status(200)
            .with_body("User-agent: *\nDisallow: /private\n")
            .expect(1)
            .create_async()
            .await;
        let host = server.host_with_port();
        let cache = RobotsCache::new(reqwest::Client::new());
        assert!(!cache.allowed("http", &host, "/private").await);
        assert!(!cache.allowed("http", &host, "/private").await);
        m.assert_async().await;
    }
}
