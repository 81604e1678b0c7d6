use crate::errors::{ActionError, Outcome};
use url::Url;

/// Script returning the markup of the current document.
pub const SCRAPING_COMMAND: &str = "document.documentElement.outerHTML";

/// Trims `script` and makes sure it ends with a statement terminator.
pub fn terminate(script: &str) -> String {
    let mut trimmed = script.trim().to_string();
    if !trimmed.ends_with(';') {
        trimmed.push(';');
    }
    trimmed
}

/// Raw content of a loaded page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    url: Option<Url>,
    status: u16,
    body: Vec<u8>,
}

impl Page {
    pub fn new(url: Option<Url>, status: u16, body: Vec<u8>) -> Self {
        Self { url, status, body }
    }

    pub fn url(&self) -> Option<&Url> {
        self.url.as_ref()
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn text(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }

    pub fn into_body(self) -> Vec<u8> {
        self.body
    }
}

/// Decodes a loaded [`Page`] into a typed document. HTML and JSON models plug
/// in here.
pub trait FromPage: Sized {
    fn from_page(page: Page) -> Outcome<Self>;
}

impl FromPage for Page {
    fn from_page(page: Page) -> Outcome<Self> {
        Ok(page)
    }
}

impl FromPage for String {
    fn from_page(page: Page) -> Outcome<Self> {
        String::from_utf8(page.into_body()).map_err(|_| ActionError::TransformFailure)
    }
}

/// An element whose activation navigates: forms, links, buttons, frames.
pub trait Redirectable {
    /// Script performing the navigation, or `None` if the element can't.
    fn action_script(&self) -> Option<String>;
}

/// An element whose attributes can be set from script.
pub trait AttributeTarget {
    fn set_attribute_script(&self, key: &str, value: Option<&str>) -> Option<String>;
}
