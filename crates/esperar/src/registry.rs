//! Name-keyed command table.
//!
//! The registry is an explicitly constructed value, usually shared as an
//! `Arc<CommandRegistry>` between every dispatcher of a process. Bindings
//! are stored in a copy-on-write map: writers build a new map and swap it
//! in, readers clone the current snapshot. A binding is therefore either
//! fully visible or not visible at all.
//!
//! Registration is not scoped to a chain or a session. Once a name is
//! (re)bound, every later dispatch through this registry sees the new
//! command, including dispatches on chains created before the change.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use serde_json::Value;

use crate::command::{
    self, Click, Command, Count, ExecuteScript, Exists, Find, GetAttribute, GetText, IsDisplayed,
    RetryOutcome, SetValue,
};
use crate::condition::{self, ConditionCommand, TextConditionCommand};
use crate::locator::LocatorChain;
use crate::result::EsperarError;
use crate::session::ResolutionContext;

type Bindings = HashMap<String, Arc<dyn Command>>;

/// Concurrency-safe mapping from operation name to command
pub struct CommandRegistry {
    bindings: RwLock<Arc<Bindings>>,
}

impl std::fmt::Debug for CommandRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandRegistry")
            .field("names", &self.names())
            .finish()
    }
}

impl Default for CommandRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self {
            bindings: RwLock::new(Arc::new(HashMap::new())),
        }
    }

    /// Create a registry with the built-in commands and conditions bound
    #[must_use]
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        registry.register("click", Click);
        registry.register("set_value", SetValue);
        registry.register("text", GetText);
        registry.register("attribute", GetAttribute);
        registry.register("is_displayed", IsDisplayed);
        registry.register("exists", Exists);
        registry.register("find", Find);
        registry.register("count", Count);
        registry.register("execute_script", ExecuteScript);
        registry.register("should_be_visible", ConditionCommand::new(condition::visible()));
        registry.register("should_be_hidden", ConditionCommand::new(condition::hidden()));
        registry.register("should_exist", ConditionCommand::new(condition::exist()));
        registry.register("should_have_text", TextConditionCommand::contains());
        registry.register("should_have_exact_text", TextConditionCommand::exact());
        registry
    }

    fn snapshot(&self) -> Arc<Bindings> {
        Arc::clone(&self.bindings.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Install or overwrite a binding; last writer wins
    pub fn register(&self, name: impl Into<String>, command: impl Command + 'static) {
        self.register_shared(name, Arc::new(command));
    }

    /// Install or overwrite a binding with an already shared command
    pub fn register_shared(&self, name: impl Into<String>, command: Arc<dyn Command>) {
        let mut current = self.bindings.write().unwrap_or_else(PoisonError::into_inner);
        let mut next = Bindings::clone(&current);
        let _ = next.insert(name.into(), command);
        *current = Arc::new(next);
    }

    /// Remove a binding, returning whether one existed
    pub fn unregister(&self, name: &str) -> bool {
        let mut current = self.bindings.write().unwrap_or_else(PoisonError::into_inner);
        if !current.contains_key(name) {
            return false;
        }
        let mut next = Bindings::clone(&current);
        let _ = next.remove(name);
        *current = Arc::new(next);
        true
    }

    /// Look up the command bound to `name`
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<Arc<dyn Command>> {
        self.snapshot().get(name).cloned()
    }

    /// Check if a name is bound
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.snapshot().contains_key(name)
    }

    /// Bound names, sorted
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.snapshot().keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of bindings
    #[must_use]
    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    /// Check if the registry is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    /// Run one attempt of the command bound to `name`.
    ///
    /// An unbound name is a fatal [`EsperarError::UnknownOperation`];
    /// everything else is the command's own outcome, unchanged.
    pub fn dispatch(
        &self,
        name: &str,
        chain: &LocatorChain,
        context: &dyn ResolutionContext,
        args: &[Value],
    ) -> RetryOutcome {
        match self.lookup(name) {
            Some(command) => command::invoke(command.as_ref(), chain, context, args),
            None => RetryOutcome::Fatal(EsperarError::UnknownOperation { name: name.into() }),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::command::{CommandOutput, Invocation};
    use crate::memory::{MemoryDocument, NodeSpec};
    use std::thread;

    struct Constant(&'static str);

    impl Command for Constant {
        fn execute(&self, _invocation: &Invocation<'_>) -> RetryOutcome {
            RetryOutcome::Success(CommandOutput::Value(Value::from(self.0)))
        }
    }

    fn document() -> MemoryDocument {
        let doc = MemoryDocument::new();
        doc.append(None, NodeSpec::new("p").id("greeting").text("hello"))
            .unwrap();
        doc
    }

    fn value_of(outcome: RetryOutcome) -> Value {
        match outcome {
            RetryOutcome::Success(CommandOutput::Value(value)) => value,
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_builtins_registered() {
        let registry = CommandRegistry::with_builtins();
        for name in ["click", "set_value", "text", "find", "should_be_visible"] {
            assert!(registry.contains(name), "{name}");
        }
        assert!(!registry.is_empty());
    }

    #[test]
    fn test_unknown_operation_is_fatal() {
        let registry = CommandRegistry::new();
        let doc = document();
        let outcome = registry.dispatch("nope", &LocatorChain::root("p"), &doc, &[]);
        assert!(matches!(
            outcome,
            RetryOutcome::Fatal(EsperarError::UnknownOperation { ref name }) if name == "nope"
        ));
    }

    #[test]
    fn test_dispatch_resolves_for_handle_commands() {
        let registry = CommandRegistry::with_builtins();
        let doc = document();
        let text = registry.dispatch("text", &LocatorChain::root("#greeting"), &doc, &[]);
        assert_eq!(value_of(text), Value::from("hello"));
    }

    #[test]
    fn test_last_writer_wins() {
        let registry = CommandRegistry::new();
        let doc = document();
        let chain = LocatorChain::root("p");
        registry.register("op", Constant("first"));
        registry.register("op", Constant("second"));
        assert_eq!(registry.len(), 1);
        assert_eq!(value_of(registry.dispatch("op", &chain, &doc, &[])), Value::from("second"));
    }

    #[test]
    fn test_registering_same_pair_twice_is_idempotent() {
        let registry = CommandRegistry::new();
        let doc = document();
        let chain = LocatorChain::root("#greeting");
        let command: Arc<dyn Command> = Arc::new(GetText);
        registry.register_shared("text", Arc::clone(&command));
        let once = value_of(registry.dispatch("text", &chain, &doc, &[]));
        registry.register_shared("text", command);
        let twice = value_of(registry.dispatch("text", &chain, &doc, &[]));
        assert_eq!(once, twice);
        assert_eq!(registry.names(), vec!["text"]);
    }

    #[test]
    fn test_registration_affects_existing_chains() {
        let registry = CommandRegistry::new();
        let doc = document();
        let chain = LocatorChain::root("p");
        registry.register("op", Constant("before"));
        assert_eq!(value_of(registry.dispatch("op", &chain, &doc, &[])), Value::from("before"));
        registry.register("op", Constant("after"));
        assert_eq!(value_of(registry.dispatch("op", &chain, &doc, &[])), Value::from("after"));
    }

    #[test]
    fn test_unregister() {
        let registry = CommandRegistry::with_builtins();
        assert!(registry.unregister("click"));
        assert!(!registry.unregister("click"));
        assert!(registry.lookup("click").is_none());
    }

    #[test]
    fn test_concurrent_register_and_lookup() {
        let registry = Arc::new(CommandRegistry::new());
        registry.register("stable", Constant("stable"));

        let writers: Vec<_> = (0..4)
            .map(|t| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || {
                    for i in 0..100 {
                        registry.register(format!("op-{t}-{i}"), Constant("x"));
                    }
                })
            })
            .collect();
        let reader = {
            let registry = Arc::clone(&registry);
            thread::spawn(move || {
                let doc = document();
                let chain = LocatorChain::root("p");
                for _ in 0..200 {
                    let outcome = registry.dispatch("stable", &chain, &doc, &[]);
                    assert_eq!(value_of(outcome), Value::from("stable"));
                }
            })
        };

        for writer in writers {
            writer.join().unwrap();
        }
        reader.join().unwrap();
        assert_eq!(registry.len(), 401);
    }

    #[test]
    fn test_debug_lists_names() {
        let registry = CommandRegistry::new();
        registry.register("zeta", Constant("z"));
        assert!(format!("{registry:?}").contains("zeta"));
    }
}
