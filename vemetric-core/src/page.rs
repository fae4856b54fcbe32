//! The embedding page as seen by the tracker
//!
//! Hosts describe their environment through the [`Page`] trait instead of
//! the tracker reaching into browser globals. [`PageSnapshot`] is the
//! ready-made implementation for hosts that keep the page state themselves.
//!
//! Clicks are delivered as a [`ClickEvent`]: the element the user clicked
//! plus its ancestors, which is all delegated click handling needs.

use std::collections::HashSet;
use std::sync::RwLock;

/// Read access to the current page
pub trait Page: Send + Sync {
    /// Full URL of the current page, including query
    fn href(&self) -> String;

    /// URL of the page that linked here, if any
    fn referrer(&self) -> Option<String>;

    /// Whether a global with this name is defined
    fn has_global(&self, name: &str) -> bool;

    /// Whether the browser reports being driven by WebDriver
    fn is_webdriver(&self) -> bool;
}

#[derive(Debug, Clone, Default)]
struct PageState {
    href: String,
    referrer: Option<String>,
    globals: HashSet<String>,
    webdriver: bool,
}

/// Mutable page state shared between a host and the tracker
#[derive(Debug, Default)]
pub struct PageSnapshot {
    state: RwLock<PageState>,
}

impl PageSnapshot {
    pub fn new(href: impl Into<String>) -> Self {
        Self {
            state: RwLock::new(PageState {
                href: href.into(),
                ..Default::default()
            }),
        }
    }

    pub fn with_referrer(self, referrer: impl Into<String>) -> Self {
        self.write(|s| s.referrer = Some(referrer.into()));
        self
    }

    pub fn with_global(self, name: impl Into<String>) -> Self {
        self.write(|s| {
            s.globals.insert(name.into());
        });
        self
    }

    pub fn with_webdriver(self, webdriver: bool) -> Self {
        self.write(|s| s.webdriver = webdriver);
        self
    }

    /// Move to a new URL. The referrer is left alone, as with
    /// client-side navigation.
    pub fn navigate(&self, href: impl Into<String>) {
        let href = href.into();
        self.write(|s| s.href = href);
    }

    fn write(&self, f: impl FnOnce(&mut PageState)) {
        match self.state.write() {
            Ok(mut state) => f(&mut state),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }

    fn read<T>(&self, f: impl FnOnce(&PageState) -> T) -> T {
        match self.state.read() {
            Ok(state) => f(&state),
            Err(poisoned) => f(&poisoned.into_inner()),
        }
    }
}

impl Page for PageSnapshot {
    fn href(&self) -> String {
        self.read(|s| s.href.clone())
    }

    fn referrer(&self) -> Option<String> {
        self.read(|s| s.referrer.clone())
    }

    fn has_global(&self, name: &str) -> bool {
        self.read(|s| s.globals.contains(name))
    }

    fn is_webdriver(&self) -> bool {
        self.read(|s| s.webdriver)
    }
}

/// An element in a click path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    tag: String,
    attributes: Vec<(String, String)>,
}

impl Element {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into().to_ascii_lowercase(),
            attributes: Vec::new(),
        }
    }

    pub fn attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.push((name.into(), value.into()));
        self
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn has_attribute(&self, name: &str) -> bool {
        self.attribute(name).is_some()
    }

    /// Attributes in document order
    pub fn attributes(&self) -> impl Iterator<Item = (&str, &str)> {
        self.attributes.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }
}

/// A click, described by its composed path.
///
/// The first element is the click target, followed by its ancestors up to
/// the document root.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClickEvent {
    path: Vec<Element>,
}

impl ClickEvent {
    pub fn new(path: Vec<Element>) -> Self {
        Self { path }
    }

    /// Nearest element, starting at the target, matching `predicate`.
    pub fn closest(&self, predicate: impl Fn(&Element) -> bool) -> Option<&Element> {
        self.path.iter().find(|e| predicate(e))
    }
}
