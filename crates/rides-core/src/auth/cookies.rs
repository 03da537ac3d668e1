use std::sync::Arc;

use reqwest::cookie::Jar;
use tracing::debug;
use url::Url;

use super::session_config::EndpointRegion;

const EXPIRED_LOGGED_IN_COOKIE: &str = "logged_in=; Path=/; Expires=Thu, 01 Jan 1970 00:00:01 GMT";
const EXPIRED_SESSION_COOKIE: &str = "session=; Path=/; Expires=Thu, 01 Jan 1970 00:00:01 GMT";

/// Side channel invalidated whenever a stored credential is cleared.
pub trait WebSessionInvalidator: Send + Sync {
    fn invalidate(&self);
}

/// Used by hosts that never share a web session with the identity provider.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopInvalidator;

impl WebSessionInvalidator for NoopInvalidator {
    fn invalidate(&self) {}
}

/// Expires the provider's authentication cookies in a shared cookie jar.
#[derive(Debug, Clone)]
pub struct CookieJarInvalidator {
    jar: Arc<Jar>,
    region: EndpointRegion,
}

impl CookieJarInvalidator {
    pub fn new(jar: Arc<Jar>, region: EndpointRegion) -> Self {
        Self { jar, region }
    }

    fn cookie_targets(&self) -> Vec<(String, &'static str)> {
        let domain = self.region.domain();
        vec![
            (
                format!("https://{domain}/"),
                EXPIRED_LOGGED_IN_COOKIE,
            ),
            (
                format!("https://login.{domain}/"),
                EXPIRED_SESSION_COOKIE,
            ),
        ]
    }
}

impl WebSessionInvalidator for CookieJarInvalidator {
    fn invalidate(&self) {
        for (target, cookie) in self.cookie_targets() {
            match Url::parse(&target) {
                Ok(url) => {
                    self.jar.add_cookie_str(cookie, &url);
                    debug!(target = %url, "expired provider cookie");
                }
                Err(err) => debug!(%err, target, "skipping unparsable cookie target"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn targets_follow_region() {
        let invalidator =
            CookieJarInvalidator::new(Arc::new(Jar::default()), EndpointRegion::China);
        let targets = invalidator.cookie_targets();
        assert_eq!(targets[0].0, "https://uber.com.cn/");
        assert_eq!(targets[1].0, "https://login.uber.com.cn/");
    }
}
