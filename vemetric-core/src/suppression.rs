//! Environment-based request suppression
//!
//! Local development pages and automated browsers must not produce events.
//! A suppressed request is not an error: the transport skips it and callers
//! see success.

use crate::config::SuppressionConfig;
use crate::page::Page;
use url::Url;

/// Decides whether a request from the current page is dropped
#[derive(Debug, Clone, Default)]
pub struct Suppression {
    config: SuppressionConfig,
}

impl Suppression {
    pub fn new(config: SuppressionConfig) -> Self {
        Self { config }
    }

    /// Whether requests from `page` should be dropped silently.
    pub fn should_ignore(&self, page: &dyn Page) -> bool {
        if self.config.suppress_local && is_local(&page.href()) {
            return true;
        }

        if self.config.honor_webdriver && page.is_webdriver() {
            return true;
        }

        self.config
            .automation_globals
            .iter()
            .any(|name| page.has_global(name))
    }
}

/// `localhost`, `127.0.0.1`, `localhost:<port>` or a `file:` URL
fn is_local(href: &str) -> bool {
    let url = match Url::parse(href) {
        Ok(url) => url,
        Err(_) => return false,
    };

    if url.scheme() == "file" {
        return true;
    }

    matches!(url.host_str(), Some("localhost") | Some("127.0.0.1"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::PageSnapshot;

    fn ignored(page: PageSnapshot) -> bool {
        Suppression::default().should_ignore(&page)
    }

    #[test]
    fn test_local_pages_are_ignored() {
        assert!(ignored(PageSnapshot::new("http://localhost/")));
        assert!(ignored(PageSnapshot::new("http://localhost:3000/app")));
        assert!(ignored(PageSnapshot::new("http://127.0.0.1:8080/")));
        assert!(ignored(PageSnapshot::new("file:///home/me/index.html")));
        assert!(!ignored(PageSnapshot::new("https://example.com/")));
        assert!(!ignored(PageSnapshot::new("https://localhost.example.com/")));
    }

    #[test]
    fn test_automation_is_ignored() {
        assert!(ignored(
            PageSnapshot::new("https://example.com/").with_webdriver(true)
        ));
        assert!(ignored(
            PageSnapshot::new("https://example.com/").with_global("__nightmare")
        ));
        assert!(ignored(
            PageSnapshot::new("https://example.com/").with_global("Cypress")
        ));
        assert!(!ignored(
            PageSnapshot::new("https://example.com/").with_global("jQuery")
        ));
    }

    #[test]
    fn test_policy_is_configurable() {
        let suppression = Suppression::new(SuppressionConfig {
            automation_globals: vec!["myBot".to_string()],
            honor_webdriver: false,
            suppress_local: false,
        });
        assert!(!suppression.should_ignore(&PageSnapshot::new("http://localhost:3000/")));
        assert!(!suppression.should_ignore(
            &PageSnapshot::new("https://example.com/").with_webdriver(true)
        ));
        assert!(!suppression.should_ignore(
            &PageSnapshot::new("https://example.com/").with_global("Cypress")
        ));
        assert!(suppression.should_ignore(
            &PageSnapshot::new("https://example.com/").with_global("myBot")
        ));
    }
}
