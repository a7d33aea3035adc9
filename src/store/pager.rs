use std::fmt;
use std::sync::Arc;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::RuleStore;
use crate::error::AppError;
use crate::rule::Rule;

/// Rules per page.
pub const PAGE_SIZE: usize = 25;

/// Opaque, URL-safe position in the rule table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PageCursor(String);

impl PageCursor {
    /// Sentinel marking the end of the table.
    pub const EOF: &'static str = "EOF";

    pub fn end() -> Self {
        PageCursor(Self::EOF.to_string())
    }

    /// Cursor positioned after `last_key`.
    pub fn encode(last_key: &str) -> Self {
        PageCursor(URL_SAFE_NO_PAD.encode(last_key.as_bytes()))
    }

    /// Parses a cursor received from a client. Validity is checked on use.
    pub fn from_raw(raw: impl Into<String>) -> Self {
        PageCursor(raw.into())
    }

    pub fn is_end(&self) -> bool {
        self.0 == Self::EOF
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The key this cursor was built from.
    pub fn decode(&self) -> Result<String, AppError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(self.0.as_bytes())
            .map_err(|_| AppError::InvalidCursor)?;
        String::from_utf8(bytes).map_err(|_| AppError::InvalidCursor)
    }
}

impl fmt::Display for PageCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone)]
pub struct Page {
    pub rules: Vec<Rule>,
    pub next: PageCursor,
}

/// Walks the rule table in fixed-size pages.
#[derive(Clone)]
pub struct Pager {
    store: Arc<dyn RuleStore>,
}

impl Pager {
    pub fn new(store: Arc<dyn RuleStore>) -> Self {
        Self { store }
    }

    /// Returns the page after `cursor`, or the first page for `None`.
    pub async fn page(&self, cursor: Option<&PageCursor>) -> Result<Page, AppError> {
        let after = match cursor {
            Some(cursor) if cursor.is_end() => {
                return Ok(Page {
                    rules: Vec::new(),
                    next: PageCursor::end(),
                })
            }
            Some(cursor) => Some(cursor.decode()?),
            None => None,
        };

        let scan = self
            .store
            .scan_page(after.as_deref(), PAGE_SIZE)
            .await
            .map_err(|e| {
                AppError::store(
                    format!("scanning rules after {}", after.as_deref().unwrap_or("start")),
                    e,
                )
            })?;

        let next = match scan.last_key {
            Some(key) => PageCursor::encode(&key),
            None => PageCursor::end(),
        };

        Ok(Page {
            rules: scan.rules,
            next,
        })
    }

    /// Reads every rule, page by page.
    pub async fn export_all(&self) -> Result<Vec<Rule>, AppError> {
        let mut rules = Vec::new();
        let mut cursor: Option<PageCursor> = None;

        loop {
            let page = self.page(cursor.as_ref()).await?;
            rules.extend(page.rules);

            if page.next.is_end() {
                break;
            }
            if cursor.as_ref() == Some(&page.next) {
                return Err(AppError::store(
                    "exporting rules",
                    super::StoreError::InvalidData(format!(
                        "scan returned cursor {} twice",
                        page.next
                    )),
                ));
            }
            cursor = Some(page.next);
        }

        debug!(count = rules.len(), "Exported rules");
        Ok(rules)
    }
}
