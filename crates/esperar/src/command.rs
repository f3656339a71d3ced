//! Commands: named units of work dispatched against a locator.
//!
//! A command never raises to signal "try again". It returns a
//! [`RetryOutcome`] and the dispatcher decides what to do with it.

use serde_json::Value;

use crate::dispatcher::Classification;
use crate::locator::{LocatorChain, Selector};
use crate::result::{EsperarError, EsperarResult};
use crate::session::{ElementHandle, ResolutionContext};

/// Value produced by a successful command
#[derive(Debug, Clone, PartialEq)]
pub enum CommandOutput {
    /// Scalar result (text, attribute, boolean, script result)
    Value(Value),
    /// A locator to continue chaining from
    Element(LocatorChain),
    /// The element is absent and the operation accepts that
    Missing,
}

impl CommandOutput {
    /// Scalar value, if any
    #[must_use]
    pub const fn as_value(&self) -> Option<&Value> {
        match self {
            Self::Value(value) => Some(value),
            _ => None,
        }
    }

    /// Chained locator, if any
    #[must_use]
    pub fn into_element(self) -> Option<LocatorChain> {
        match self {
            Self::Element(chain) => Some(chain),
            _ => None,
        }
    }

    /// Whether this is the missing-element sentinel
    #[must_use]
    pub const fn is_missing(&self) -> bool {
        matches!(self, Self::Missing)
    }
}

/// Tagged result of one dispatch attempt
#[derive(Debug)]
pub enum RetryOutcome {
    /// The operation succeeded
    Success(CommandOutput),
    /// The operation failed, but may succeed on a later attempt
    Retryable(EsperarError),
    /// The operation failed and retrying cannot help
    Fatal(EsperarError),
}

impl RetryOutcome {
    /// Classify an error with the dispatcher's policy
    #[must_use]
    pub fn from_error(error: EsperarError) -> Self {
        match Classification::of(&error) {
            Classification::Retryable => Self::Retryable(error),
            Classification::Fatal => Self::Fatal(error),
        }
    }

    /// Check if the outcome is a success
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

impl From<EsperarResult<CommandOutput>> for RetryOutcome {
    fn from(result: EsperarResult<CommandOutput>) -> Self {
        match result {
            Ok(output) => Self::Success(output),
            Err(error) => Self::from_error(error),
        }
    }
}

/// Whether a command needs a live handle before it runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// The registry resolves the chain first; failures never reach the command
    Handle,
    /// The command decides if and when to resolve
    Lazy,
}

/// Everything a command receives for one attempt
#[derive(Clone, Copy)]
pub struct Invocation<'a> {
    /// Locator the operation was invoked on
    pub chain: &'a LocatorChain,
    /// Remote session
    pub context: &'a dyn ResolutionContext,
    /// Handle resolved by the registry for [`Resolution::Handle`] commands
    pub handle: Option<&'a ElementHandle>,
    /// Caller-supplied arguments
    pub args: &'a [Value],
}

impl std::fmt::Debug for Invocation<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Invocation")
            .field("chain", &self.chain.to_string())
            .field("handle", &self.handle)
            .field("args", &self.args)
            .finish_non_exhaustive()
    }
}

impl Invocation<'_> {
    /// The pre-resolved handle, or a fresh resolution of the chain
    pub fn element(&self) -> EsperarResult<ElementHandle> {
        match self.handle {
            Some(handle) => Ok(handle.clone()),
            None => self.chain.resolve(self.context),
        }
    }

    /// Fail unless the argument count is within `min..=max`
    pub fn expect_arity(&self, name: &str, min: usize, max: usize) -> EsperarResult<()> {
        let count = self.args.len();
        if (min..=max).contains(&count) {
            Ok(())
        } else if min == max {
            Err(EsperarError::invalid_argument(format!(
                "{name} expects {min} argument(s), got {count}"
            )))
        } else {
            Err(EsperarError::invalid_argument(format!(
                "{name} expects {min}..={max} arguments, got {count}"
            )))
        }
    }

    /// String argument at `index`
    pub fn str_arg(&self, name: &str, index: usize) -> EsperarResult<&str> {
        self.args
            .get(index)
            .and_then(Value::as_str)
            .ok_or_else(|| {
                EsperarError::invalid_argument(format!(
                    "{name} expects a string at argument {index}"
                ))
            })
    }

    /// Optional unsigned integer argument at `index`
    pub fn index_arg(&self, name: &str, index: usize) -> EsperarResult<Option<usize>> {
        match self.args.get(index) {
            None => Ok(None),
            Some(value) => value
                .as_u64()
                .and_then(|n| usize::try_from(n).ok())
                .map(Some)
                .ok_or_else(|| {
                    EsperarError::invalid_argument(format!(
                        "{name} expects a non-negative integer at argument {index}"
                    ))
                }),
        }
    }
}

/// A named, stateless unit of work.
///
/// Side effects are only allowed against the session, never against
/// shared engine state.
pub trait Command: Send + Sync {
    /// Whether the registry resolves the chain before calling
    fn resolution(&self) -> Resolution {
        Resolution::Handle
    }

    /// Run one attempt
    fn execute(&self, invocation: &Invocation<'_>) -> RetryOutcome;
}

/// Run a command for one attempt, resolving first if it asks for a handle
pub fn invoke(
    command: &dyn Command,
    chain: &LocatorChain,
    context: &dyn ResolutionContext,
    args: &[Value],
) -> RetryOutcome {
    let handle = match command.resolution() {
        Resolution::Handle => match chain.resolve(context) {
            Ok(handle) => Some(handle),
            Err(error) => return RetryOutcome::from_error(error),
        },
        Resolution::Lazy => None,
    };
    command.execute(&Invocation {
        chain,
        context,
        handle: handle.as_ref(),
        args,
    })
}

// =============================================================================
// BUILT-IN COMMANDS
// =============================================================================

/// `click`: click the element, then continue from it
#[derive(Debug, Clone, Copy, Default)]
pub struct Click;

impl Command for Click {
    fn execute(&self, invocation: &Invocation<'_>) -> RetryOutcome {
        let run = || -> EsperarResult<CommandOutput> {
            invocation.expect_arity("click", 0, 0)?;
            invocation.context.click(&invocation.element()?)?;
            Ok(CommandOutput::Element(invocation.chain.clone()))
        };
        run().into()
    }
}

/// `set_value`: replace the element's value
#[derive(Debug, Clone, Copy, Default)]
pub struct SetValue;

impl Command for SetValue {
    fn execute(&self, invocation: &Invocation<'_>) -> RetryOutcome {
        let run = || -> EsperarResult<CommandOutput> {
            invocation.expect_arity("set_value", 1, 1)?;
            let value = invocation.str_arg("set_value", 0)?;
            invocation.context.set_value(&invocation.element()?, value)?;
            Ok(CommandOutput::Element(invocation.chain.clone()))
        };
        run().into()
    }
}

/// `text`: rendered text of the element
#[derive(Debug, Clone, Copy, Default)]
pub struct GetText;

impl Command for GetText {
    fn execute(&self, invocation: &Invocation<'_>) -> RetryOutcome {
        let run = || -> EsperarResult<CommandOutput> {
            invocation.expect_arity("text", 0, 0)?;
            let text = invocation.context.text(&invocation.element()?)?;
            Ok(CommandOutput::Value(Value::String(text)))
        };
        run().into()
    }
}

/// `attribute`: attribute value, `null` when absent
#[derive(Debug, Clone, Copy, Default)]
pub struct GetAttribute;

impl Command for GetAttribute {
    fn execute(&self, invocation: &Invocation<'_>) -> RetryOutcome {
        let run = || -> EsperarResult<CommandOutput> {
            invocation.expect_arity("attribute", 1, 1)?;
            let name = invocation.str_arg("attribute", 0)?;
            let value = invocation.context.attribute(&invocation.element()?, name)?;
            Ok(CommandOutput::Value(value.map_or(Value::Null, Value::String)))
        };
        run().into()
    }
}

/// `is_displayed`: `false` for missing elements instead of failing
#[derive(Debug, Clone, Copy, Default)]
pub struct IsDisplayed;

impl Command for IsDisplayed {
    fn resolution(&self) -> Resolution {
        Resolution::Lazy
    }

    fn execute(&self, invocation: &Invocation<'_>) -> RetryOutcome {
        let run = || -> EsperarResult<CommandOutput> {
            invocation.expect_arity("is_displayed", 0, 0)?;
            let displayed = match invocation
                .element()
                .and_then(|handle| invocation.context.is_displayed(&handle))
            {
                Ok(displayed) => displayed,
                Err(error) if error.is_resolution_failure() => false,
                Err(error) => return Err(error),
            };
            Ok(CommandOutput::Value(Value::Bool(displayed)))
        };
        run().into()
    }
}

/// `exists`: whether the chain currently resolves
#[derive(Debug, Clone, Copy, Default)]
pub struct Exists;

impl Command for Exists {
    fn resolution(&self) -> Resolution {
        Resolution::Lazy
    }

    fn execute(&self, invocation: &Invocation<'_>) -> RetryOutcome {
        let run = || -> EsperarResult<CommandOutput> {
            invocation.expect_arity("exists", 0, 0)?;
            let exists = match invocation.element() {
                Ok(_) => true,
                Err(error) if error.is_resolution_failure() => false,
                Err(error) => return Err(error),
            };
            Ok(CommandOutput::Value(Value::Bool(exists)))
        };
        run().into()
    }
}

/// `find`: child locator `(css, index?)`, built without touching the session
#[derive(Debug, Clone, Copy, Default)]
pub struct Find;

impl Command for Find {
    fn resolution(&self) -> Resolution {
        Resolution::Lazy
    }

    fn execute(&self, invocation: &Invocation<'_>) -> RetryOutcome {
        let run = || -> EsperarResult<CommandOutput> {
            invocation.expect_arity("find", 1, 2)?;
            let selector = Selector::css(invocation.str_arg("find", 0)?);
            selector.validate()?;
            let index = invocation.index_arg("find", 1)?.unwrap_or(0);
            Ok(CommandOutput::Element(
                invocation.chain.child_at(selector, index),
            ))
        };
        run().into()
    }
}

/// `count`: number of current matches of a css selector inside the element
#[derive(Debug, Clone, Copy, Default)]
pub struct Count;

impl Command for Count {
    fn execute(&self, invocation: &Invocation<'_>) -> RetryOutcome {
        let run = || -> EsperarResult<CommandOutput> {
            invocation.expect_arity("count", 1, 1)?;
            let selector = Selector::css(invocation.str_arg("count", 0)?);
            selector.validate()?;
            let handle = invocation.element()?;
            let matches = invocation.context.find_all(Some(&handle), &selector)?;
            Ok(CommandOutput::Value(Value::from(matches.len())))
        };
        run().into()
    }
}

/// `execute_script`: evaluate `(script, args...)` in the remote document
#[derive(Debug, Clone, Copy, Default)]
pub struct ExecuteScript;

impl Command for ExecuteScript {
    fn resolution(&self) -> Resolution {
        Resolution::Lazy
    }

    fn execute(&self, invocation: &Invocation<'_>) -> RetryOutcome {
        let run = || -> EsperarResult<CommandOutput> {
            invocation.expect_arity("execute_script", 1, usize::MAX)?;
            let script = invocation.str_arg("execute_script", 0)?;
            let result = invocation
                .context
                .evaluate(script, &invocation.args[1..])?;
            Ok(CommandOutput::Value(result))
        };
        run().into()
    }
}
