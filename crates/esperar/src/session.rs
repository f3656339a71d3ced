//! Remote session abstraction.
//!
//! A [`ResolutionContext`] is everything the engine needs from a live
//! document: scoped lookups plus a handful of element primitives. Session
//! lifecycle (launching a browser, connecting to a driver) is the caller's
//! business.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::locator::Selector;
use crate::result::{EsperarError, EsperarResult};

/// Transient reference to a resolved element.
///
/// Handles are compared by the session's identity rules: two handles are
/// equal when the session issued them for the same underlying element.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ElementHandle {
    id: String,
}

impl ElementHandle {
    /// Create a handle from a session-specific id
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }

    /// Session-specific id
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl std::fmt::Display for ElementHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "element#{}", self.id)
    }
}

/// Abstraction over a remote session.
///
/// Implementations must be safe to share across threads; the dispatcher
/// only ever calls them from the thread running the wait.
pub trait ResolutionContext: Send + Sync {
    /// All elements matching `selector`, in document order.
    ///
    /// With `scope = None` the lookup runs against the document root,
    /// otherwise against the descendants of `scope`.
    fn find_all(
        &self,
        scope: Option<&ElementHandle>,
        selector: &Selector,
    ) -> EsperarResult<Vec<ElementHandle>>;

    /// Rendered text of the element
    fn text(&self, element: &ElementHandle) -> EsperarResult<String>;

    /// Whether the element is displayed
    fn is_displayed(&self, element: &ElementHandle) -> EsperarResult<bool>;

    /// Attribute value, `None` when absent
    fn attribute(&self, element: &ElementHandle, name: &str) -> EsperarResult<Option<String>>;

    /// Click the element
    fn click(&self, element: &ElementHandle) -> EsperarResult<()>;

    /// Replace the element's value
    fn set_value(&self, element: &ElementHandle, value: &str) -> EsperarResult<()>;

    /// Evaluate a script in the remote document
    fn evaluate(&self, script: &str, args: &[Value]) -> EsperarResult<Value>;

    /// Capture a screenshot of the current document
    fn screenshot(&self) -> EsperarResult<Vec<u8>> {
        Err(EsperarError::Unsupported {
            feature: "screenshot".into(),
        })
    }

    /// Serialize the current document
    fn page_source(&self) -> EsperarResult<String> {
        Err(EsperarError::Unsupported {
            feature: "page source".into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_identity() {
        assert_eq!(ElementHandle::new("7"), ElementHandle::new("7"));
        assert_ne!(ElementHandle::new("7"), ElementHandle::new("8"));
    }

    #[test]
    fn test_handle_display() {
        assert_eq!(ElementHandle::new("42").to_string(), "element#42");
    }
}
