//! Fluent surface over a dispatcher, a session and a locator.
//!
//! ```ignore
//! let registry = Arc::new(CommandRegistry::with_builtins());
//! let dispatcher = RetryDispatcher::new(registry);
//! let form = dispatcher.element(&session, LocatorChain::root("#login"));
//! form.find("input[name=user]").set_value("ada")?;
//! form.find("button").click()?;
//! dispatcher
//!     .element(&session, LocatorChain::root(".banner"))
//!     .should(&condition::text("welcome"))?;
//! ```

use std::time::Duration;

use serde_json::Value;

use crate::collection::CollectionCondition;
use crate::command::CommandOutput;
use crate::condition::Condition;
use crate::dispatcher::{RetryConfig, RetryDispatcher};
use crate::locator::{ElementsCollection, LocatorChain, Selector};
use crate::result::{EsperarError, EsperarResult};
use crate::session::ResolutionContext;

fn unexpected(operation: &str, output: &CommandOutput) -> EsperarError {
    EsperarError::RemoteEvaluation {
        message: format!("'{operation}' returned an unexpected result: {output:?}"),
    }
}

/// A single lazily located element
#[derive(Clone)]
pub struct Element<'a> {
    dispatcher: &'a RetryDispatcher,
    context: &'a dyn ResolutionContext,
    chain: LocatorChain,
    config: RetryConfig,
}

impl std::fmt::Debug for Element<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Element")
            .field("chain", &self.chain.to_string())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<'a> Element<'a> {
    /// Bind a chain to a dispatcher and session
    #[must_use]
    pub fn new(
        dispatcher: &'a RetryDispatcher,
        context: &'a dyn ResolutionContext,
        chain: LocatorChain,
    ) -> Self {
        Self {
            dispatcher,
            context,
            chain,
            config: *dispatcher.config(),
        }
    }

    /// Underlying locator
    #[must_use]
    pub const fn chain(&self) -> &LocatorChain {
        &self.chain
    }

    /// Override the wait budget for calls made through this handle
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Override the whole retry config
    #[must_use]
    pub const fn with_config(mut self, config: RetryConfig) -> Self {
        self.config = config;
        self
    }

    fn derive(&self, chain: LocatorChain) -> Self {
        Self {
            dispatcher: self.dispatcher,
            context: self.context,
            chain,
            config: self.config,
        }
    }

    /// First descendant matching `selector`
    #[must_use]
    pub fn find(&self, selector: impl Into<Selector>) -> Self {
        self.derive(self.chain.child(selector))
    }

    /// `index`-th descendant matching `selector`
    #[must_use]
    pub fn find_at(&self, selector: impl Into<Selector>, index: usize) -> Self {
        self.derive(self.chain.child_at(selector, index))
    }

    /// Same selector, different ordinal
    #[must_use]
    pub fn nth(&self, index: usize) -> Self {
        self.derive(self.chain.nth(index))
    }

    /// All descendants matching `selector`
    #[must_use]
    pub fn find_all(&self, selector: impl Into<Selector>) -> Elements<'a> {
        Elements {
            dispatcher: self.dispatcher,
            context: self.context,
            collection: self.chain.all(selector),
            config: self.config,
        }
    }

    /// Run any registered operation on this element
    pub fn execute(&self, name: &str, args: &[Value]) -> EsperarResult<CommandOutput> {
        self.dispatcher
            .execute_with(self.context, name, &self.chain, args, self.config)
    }

    /// Click, waiting for the element first
    pub fn click(&self) -> EsperarResult<Self> {
        self.execute("click", &[])?;
        Ok(self.clone())
    }

    /// Replace the element's value
    pub fn set_value(&self, value: &str) -> EsperarResult<Self> {
        self.execute("set_value", &[Value::from(value)])?;
        Ok(self.clone())
    }

    /// Rendered text
    pub fn text(&self) -> EsperarResult<String> {
        match self.execute("text", &[])? {
            CommandOutput::Value(Value::String(text)) => Ok(text),
            other => Err(unexpected("text", &other)),
        }
    }

    /// Attribute value, `None` when absent
    pub fn attribute(&self, name: &str) -> EsperarResult<Option<String>> {
        match self.execute("attribute", &[Value::from(name)])? {
            CommandOutput::Value(Value::String(value)) => Ok(Some(value)),
            CommandOutput::Value(Value::Null) => Ok(None),
            other => Err(unexpected("attribute", &other)),
        }
    }

    /// Whether the element is displayed; `false` when it does not exist
    pub fn is_displayed(&self) -> EsperarResult<bool> {
        self.flag("is_displayed")
    }

    /// Whether the element currently exists
    pub fn exists(&self) -> EsperarResult<bool> {
        self.flag("exists")
    }

    fn flag(&self, operation: &str) -> EsperarResult<bool> {
        match self.execute(operation, &[])? {
            CommandOutput::Value(Value::Bool(flag)) => Ok(flag),
            other => Err(unexpected(operation, &other)),
        }
    }

    /// Wait until `condition` holds
    pub fn should(&self, condition: &dyn Condition) -> EsperarResult<Self> {
        self.dispatcher
            .should_with(self.context, &self.chain, condition, self.config)?;
        Ok(self.clone())
    }

    /// Wait until `condition` does not hold
    pub fn should_not(&self, condition: &dyn Condition) -> EsperarResult<Self> {
        self.should(&crate::condition::not(condition))
    }
}

/// All current matches of a selector, located lazily
#[derive(Clone)]
pub struct Elements<'a> {
    dispatcher: &'a RetryDispatcher,
    context: &'a dyn ResolutionContext,
    collection: ElementsCollection,
    config: RetryConfig,
}

impl std::fmt::Debug for Elements<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Elements")
            .field("collection", &self.collection.to_string())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<'a> Elements<'a> {
    /// Bind a collection to a dispatcher and session
    #[must_use]
    pub fn new(
        dispatcher: &'a RetryDispatcher,
        context: &'a dyn ResolutionContext,
        collection: ElementsCollection,
    ) -> Self {
        Self {
            dispatcher,
            context,
            collection,
            config: *dispatcher.config(),
        }
    }

    /// Underlying collection
    #[must_use]
    pub const fn collection(&self) -> &ElementsCollection {
        &self.collection
    }

    /// Override the wait budget
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Element at `index`
    #[must_use]
    pub fn get(&self, index: usize) -> Element<'a> {
        Element::new(self.dispatcher, self.context, self.collection.get(index))
            .with_config(self.config)
    }

    /// First element
    #[must_use]
    pub fn first(&self) -> Element<'a> {
        self.get(0)
    }

    /// Number of matches right now, without waiting
    pub fn len(&self) -> EsperarResult<usize> {
        Ok(self.collection.resolve(self.context)?.len())
    }

    /// Whether there are no matches right now
    pub fn is_empty(&self) -> EsperarResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Texts of the current matches, without waiting
    pub fn texts(&self) -> EsperarResult<Vec<String>> {
        self.collection
            .resolve(self.context)?
            .iter()
            .map(|handle| self.context.text(handle))
            .collect()
    }

    /// Wait until `condition` holds for the collection
    pub fn should_have(&self, condition: &dyn CollectionCondition) -> EsperarResult<Self> {
        self.dispatcher
            .should_have_with(self.context, &self.collection, condition, self.config)?;
        Ok(self.clone())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::collection;
    use crate::condition;
    use crate::memory::{MemoryDocument, NodeSpec};
    use crate::registry::CommandRegistry;
    use std::sync::Arc;

    fn dispatcher() -> RetryDispatcher {
        RetryDispatcher::new(Arc::new(CommandRegistry::with_builtins())).with_config(
            RetryConfig::new(Duration::from_millis(100)).with_poll_interval(Duration::from_millis(5)),
        )
    }

    fn login_page() -> MemoryDocument {
        let doc = MemoryDocument::new();
        let form = doc.append(None, NodeSpec::new("form").id("login")).unwrap();
        doc.append(Some(&form), NodeSpec::new("input").attr("name", "user"))
            .unwrap();
        doc.append(Some(&form), NodeSpec::new("button").text("Sign in"))
            .unwrap();
        let menu = doc.append(None, NodeSpec::new("ul").id("menu")).unwrap();
        for item in ["Home", "About"] {
            doc.append(Some(&menu), NodeSpec::new("li").text(item)).unwrap();
        }
        doc
    }

    mod element_tests {
        use super::*;

        #[test]
        fn test_fill_and_read_back() {
            let doc = login_page();
            let dispatcher = dispatcher();
            let form = dispatcher.element(&doc, LocatorChain::root("#login"));
            let user = form.find("input[name=user]").set_value("ada").unwrap();
            assert_eq!(user.attribute("value").unwrap(), Some("ada".into()));
            assert_eq!(user.attribute("placeholder").unwrap(), None);
            form.find("button").click().unwrap();
            assert_eq!(form.find("button").text().unwrap(), "Sign in");
        }

        #[test]
        fn test_flags_for_missing_element() {
            let doc = login_page();
            let dispatcher = dispatcher();
            let missing = dispatcher.element(&doc, LocatorChain::root("#nope"));
            assert!(!missing.exists().unwrap());
            assert!(!missing.is_displayed().unwrap());
        }

        #[test]
        fn test_should_and_should_not() {
            let doc = login_page();
            let dispatcher = dispatcher();
            let button = dispatcher.element(&doc, LocatorChain::root("button"));
            button.should(&condition::exact_text("sign in")).unwrap();
            button.should_not(&condition::css_class("disabled")).unwrap();
        }

        #[test]
        fn test_with_timeout_zero_fails_fast() {
            let doc = login_page();
            let dispatcher = dispatcher();
            let err = dispatcher
                .element(&doc, LocatorChain::root("#nope"))
                .with_timeout(Duration::ZERO)
                .click()
                .unwrap_err();
            assert!(matches!(err, EsperarError::Timeout { attempts: 1, .. }));
        }

        #[test]
        fn test_unexpected_output_is_reported() {
            let doc = login_page();
            let dispatcher = dispatcher();
            dispatcher.registry().register("text", crate::command::Exists);
            let err = dispatcher
                .element(&doc, LocatorChain::root("button"))
                .text()
                .unwrap_err();
            assert!(matches!(err, EsperarError::RemoteEvaluation { .. }));
        }
    }

    mod elements_tests {
        use super::*;

        #[test]
        fn test_collection_queries() {
            let doc = login_page();
            let dispatcher = dispatcher();
            let items = dispatcher
                .element(&doc, LocatorChain::root("#menu"))
                .find_all("li");
            assert_eq!(items.len().unwrap(), 2);
            assert_eq!(items.texts().unwrap(), vec!["Home", "About"]);
            assert_eq!(items.get(1).text().unwrap(), "About");
            assert_eq!(items.first().text().unwrap(), "Home");
            items
                .should_have(&collection::texts_in_any_order(["about", "HOME"]))
                .unwrap();
        }

        #[test]
        fn test_empty_collection() {
            let doc = login_page();
            let dispatcher = dispatcher();
            let rows = dispatcher.elements(&doc, ElementsCollection::new("tr"));
            assert!(rows.is_empty().unwrap());
            rows.should_have(&collection::size(0)).unwrap();
        }
    }
}
