//! Lazy, chainable element locators.
//!
//! # Design Philosophy
//!
//! - **Lazy**: Building a locator never touches the session; only
//!   [`LocatorChain::resolve`] does
//! - **Never Cached**: Every resolution starts from scratch, because the
//!   remote document may have changed since the last attempt
//! - **Immutable**: Composition always returns a new chain, so chains can be
//!   shared freely across threads
//! - **Scoped**: A child resolves inside its parent's resolved element, never
//!   against the document root

use std::fmt;
use std::sync::Arc;

use crate::result::{EsperarError, EsperarResult};
use crate::session::{ElementHandle, ResolutionContext};

/// Selector type for locating elements
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Selector {
    /// CSS selector (e.g., "button.primary")
    Css(String),
    /// XPath selector
    XPath(String),
    /// Text content selector
    Text(String),
    /// Test ID selector (data-testid attribute)
    TestId(String),
}

impl Selector {
    /// Create a CSS selector
    #[must_use]
    pub fn css(selector: impl Into<String>) -> Self {
        Self::Css(selector.into())
    }

    /// Create an XPath selector
    #[must_use]
    pub fn xpath(selector: impl Into<String>) -> Self {
        Self::XPath(selector.into())
    }

    /// Create a text selector
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    /// Create a test ID selector
    #[must_use]
    pub fn test_id(id: impl Into<String>) -> Self {
        Self::TestId(id.into())
    }

    /// Raw selector expression
    #[must_use]
    pub fn expression(&self) -> &str {
        match self {
            Self::Css(s) | Self::XPath(s) | Self::Text(s) | Self::TestId(s) => s,
        }
    }

    /// Check the selector is well-formed.
    ///
    /// # Errors
    ///
    /// Returns [`EsperarError::InvalidArgument`] for empty selectors and CSS
    /// or XPath with unbalanced brackets or quotes.
    pub fn validate(&self) -> EsperarResult<()> {
        let expression = self.expression();
        if expression.trim().is_empty() {
            return Err(EsperarError::invalid_argument(format!(
                "empty selector: {self}"
            )));
        }
        match self {
            Self::Css(s) | Self::XPath(s) => check_balanced(s),
            Self::Text(_) | Self::TestId(_) => Ok(()),
        }
    }
}

fn check_balanced(expression: &str) -> EsperarResult<()> {
    let mut open: Vec<char> = Vec::new();
    let mut quote: Option<char> = None;
    for c in expression.chars() {
        if let Some(q) = quote {
            if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' => quote = Some(c),
            '[' | '(' => open.push(c),
            ']' | ')' => {
                let expected = if c == ']' { '[' } else { '(' };
                if open.pop() != Some(expected) {
                    return Err(EsperarError::invalid_argument(format!(
                        "invalid selector syntax: unexpected '{c}' in {expression:?}"
                    )));
                }
            }
            _ => {}
        }
    }
    if quote.is_some() || !open.is_empty() {
        return Err(EsperarError::invalid_argument(format!(
            "invalid selector syntax: unterminated group in {expression:?}"
        )));
    }
    Ok(())
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Css(s) => write!(f, "{s}"),
            Self::XPath(s) => write!(f, "By.xpath: {s}"),
            Self::Text(s) => write!(f, "by text: {s}"),
            Self::TestId(s) => write!(f, "[data-testid={s}]"),
        }
    }
}

impl From<&str> for Selector {
    fn from(css: &str) -> Self {
        Self::css(css)
    }
}

impl From<String> for Selector {
    fn from(css: String) -> Self {
        Self::Css(css)
    }
}

/// Immutable description of how to find one element.
///
/// A chain without a parent resolves against the session root; a chain
/// with a parent resolves against the parent's resolved element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocatorChain {
    selector: Selector,
    index: usize,
    parent: Option<Arc<LocatorChain>>,
}

impl LocatorChain {
    /// Create a root-level locator for the first match of `selector`
    #[must_use]
    pub fn root(selector: impl Into<Selector>) -> Self {
        Self {
            selector: selector.into(),
            index: 0,
            parent: None,
        }
    }

    /// Locate the first match of `selector` inside this element
    #[must_use]
    pub fn child(&self, selector: impl Into<Selector>) -> Self {
        self.child_at(selector, 0)
    }

    /// Locate the `index`-th match of `selector` inside this element
    #[must_use]
    pub fn child_at(&self, selector: impl Into<Selector>, index: usize) -> Self {
        Self {
            selector: selector.into(),
            index,
            parent: Some(Arc::new(self.clone())),
        }
    }

    /// Same selector and parent, different ordinal
    #[must_use]
    pub fn nth(&self, index: usize) -> Self {
        Self {
            selector: self.selector.clone(),
            index,
            parent: self.parent.clone(),
        }
    }

    /// All matches of `selector` inside this element
    #[must_use]
    pub fn all(&self, selector: impl Into<Selector>) -> ElementsCollection {
        ElementsCollection {
            parent: Some(Arc::new(self.clone())),
            selector: selector.into(),
        }
    }

    /// Get the selector
    #[must_use]
    pub const fn selector(&self) -> &Selector {
        &self.selector
    }

    /// Get the ordinal among matches
    #[must_use]
    pub const fn index(&self) -> usize {
        self.index
    }

    /// Get the parent chain
    #[must_use]
    pub fn parent(&self) -> Option<&LocatorChain> {
        self.parent.as_deref()
    }

    /// Number of nodes from this one up to the root (a root chain has depth 1)
    #[must_use]
    pub fn depth(&self) -> usize {
        self.ancestors().count() + 1
    }

    /// Ancestors, nearest first
    pub fn ancestors(&self) -> impl Iterator<Item = &LocatorChain> {
        std::iter::successors(self.parent(), |chain| chain.parent())
    }

    /// Resolve against the current remote state.
    ///
    /// # Errors
    ///
    /// - [`EsperarError::InvalidArgument`] if any selector on the path is malformed
    /// - [`EsperarError::NotFound`] if this node or an ancestor has no match
    /// - [`EsperarError::IndexOutOfRange`] if there are matches but fewer than `index + 1`
    pub fn resolve(&self, context: &dyn ResolutionContext) -> EsperarResult<ElementHandle> {
        let scope = match &self.parent {
            Some(parent) => Some(parent.resolve(context)?),
            None => None,
        };
        self.selector.validate()?;
        let matches = context.find_all(scope.as_ref(), &self.selector)?;
        let count = matches.len();
        if count == 0 {
            return Err(EsperarError::NotFound {
                locator: self.to_string(),
            });
        }
        matches
            .into_iter()
            .nth(self.index)
            .ok_or_else(|| EsperarError::IndexOutOfRange {
                locator: self.to_string(),
                index: self.index,
                count,
            })
    }
}

impl fmt::Display for LocatorChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(parent) = &self.parent {
            write!(f, "{parent} > ")?;
        }
        write!(f, "{}", self.selector)?;
        if self.index > 0 {
            write!(f, "[{}]", self.index)?;
        }
        Ok(())
    }
}

/// Immutable description of an ordered set of elements
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementsCollection {
    parent: Option<Arc<LocatorChain>>,
    selector: Selector,
}

impl ElementsCollection {
    /// All root-level matches of `selector`
    #[must_use]
    pub fn new(selector: impl Into<Selector>) -> Self {
        Self {
            parent: None,
            selector: selector.into(),
        }
    }

    /// Get the selector
    #[must_use]
    pub const fn selector(&self) -> &Selector {
        &self.selector
    }

    /// Get the parent chain
    #[must_use]
    pub fn parent(&self) -> Option<&LocatorChain> {
        self.parent.as_deref()
    }

    /// Locator for the `index`-th element of this collection
    #[must_use]
    pub fn get(&self, index: usize) -> LocatorChain {
        LocatorChain {
            selector: self.selector.clone(),
            index,
            parent: self.parent.clone(),
        }
    }

    /// Locator for the first element of this collection
    #[must_use]
    pub fn first(&self) -> LocatorChain {
        self.get(0)
    }

    /// Resolve every current match, in document order.
    ///
    /// An empty result is not an error; a missing parent is.
    ///
    /// # Errors
    ///
    /// Returns resolution errors from the parent chain and
    /// [`EsperarError::InvalidArgument`] for a malformed selector.
    pub fn resolve(&self, context: &dyn ResolutionContext) -> EsperarResult<Vec<ElementHandle>> {
        let scope = match &self.parent {
            Some(parent) => Some(parent.resolve(context)?),
            None => None,
        };
        self.selector.validate()?;
        context.find_all(scope.as_ref(), &self.selector)
    }
}

impl fmt::Display for ElementsCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(parent) = &self.parent {
            write!(f, "{parent} > ")?;
        }
        write!(f, "{}", self.selector)
    }
}
