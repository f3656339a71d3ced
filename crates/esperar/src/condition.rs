//! Element conditions.
//!
//! A condition looks at one resolved element and says whether it is
//! acceptable. It never sleeps and never retries; the dispatcher owns that.
//!
//! ```ignore
//! dispatcher.should(&doc, &chain, &condition::text("Welcome"))?;
//! dispatcher.should(&doc, &spinner, &condition::not(condition::visible()))?;
//! ```

use std::sync::{Arc, OnceLock};

use regex::Regex;

use crate::command::{Command, CommandOutput, Invocation, Resolution, RetryOutcome};
use crate::locator::LocatorChain;
use crate::result::{EsperarError, EsperarResult};
use crate::session::{ElementHandle, ResolutionContext};

/// Whether an observed state is acceptable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// The condition holds
    Accept,
    /// The condition does not hold (yet)
    Reject,
}

/// Verdict plus the observed value, used in failure messages
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Check {
    /// Verdict
    pub verdict: Verdict,
    /// What was observed
    pub actual: String,
}

impl Check {
    /// Accepting check
    #[must_use]
    pub fn accept(actual: impl Into<String>) -> Self {
        Self {
            verdict: Verdict::Accept,
            actual: actual.into(),
        }
    }

    /// Rejecting check
    #[must_use]
    pub fn reject(actual: impl Into<String>) -> Self {
        Self {
            verdict: Verdict::Reject,
            actual: actual.into(),
        }
    }

    /// Accept when `holds`, reject otherwise
    #[must_use]
    pub fn from_bool(holds: bool, actual: impl Into<String>) -> Self {
        if holds {
            Self::accept(actual)
        } else {
            Self::reject(actual)
        }
    }

    /// Check if the verdict is `Accept`
    #[must_use]
    pub fn is_accepted(&self) -> bool {
        self.verdict == Verdict::Accept
    }
}

/// Predicate over a single resolved element
pub trait Condition: Send + Sync {
    /// Human-readable description, e.g. `be visible`
    fn name(&self) -> String;

    /// Inspect the element
    fn check(&self, context: &dyn ResolutionContext, element: &ElementHandle)
        -> EsperarResult<Check>;

    /// Whether a chain that cannot be resolved satisfies this condition
    fn accepts_when_unresolvable(&self) -> bool {
        false
    }
}

impl<C: Condition + ?Sized> Condition for &C {
    fn name(&self) -> String {
        (**self).name()
    }

    fn check(
        &self,
        context: &dyn ResolutionContext,
        element: &ElementHandle,
    ) -> EsperarResult<Check> {
        (**self).check(context, element)
    }

    fn accepts_when_unresolvable(&self) -> bool {
        (**self).accepts_when_unresolvable()
    }
}

impl<C: Condition + ?Sized> Condition for Arc<C> {
    fn name(&self) -> String {
        (**self).name()
    }

    fn check(
        &self,
        context: &dyn ResolutionContext,
        element: &ElementHandle,
    ) -> EsperarResult<Check> {
        (**self).check(context, element)
    }

    fn accepts_when_unresolvable(&self) -> bool {
        (**self).accepts_when_unresolvable()
    }
}

// =============================================================================
// TEXT NORMALIZATION
// =============================================================================

fn whitespace_runs() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"[\s\x{00A0}\x{2007}\x{202F}\x{FEFF}]+").expect("whitespace pattern is valid")
    })
}

/// Case-fold, collapse whitespace runs (including no-break spaces) and trim
#[must_use]
pub fn normalize(text: &str) -> String {
    whitespace_runs()
        .replace_all(text, " ")
        .trim()
        .to_lowercase()
}

// =============================================================================
// BUILT-IN CONDITIONS
// =============================================================================

/// Element is displayed
#[derive(Debug, Clone, Copy, Default)]
pub struct Visible;

impl Condition for Visible {
    fn name(&self) -> String {
        "be visible".into()
    }

    fn check(
        &self,
        context: &dyn ResolutionContext,
        element: &ElementHandle,
    ) -> EsperarResult<Check> {
        let displayed = context.is_displayed(element)?;
        Ok(Check::from_bool(displayed, visibility(displayed)))
    }
}

/// Element is not displayed, or does not exist at all
#[derive(Debug, Clone, Copy, Default)]
pub struct Hidden;

impl Condition for Hidden {
    fn name(&self) -> String {
        "be hidden".into()
    }

    fn check(
        &self,
        context: &dyn ResolutionContext,
        element: &ElementHandle,
    ) -> EsperarResult<Check> {
        let displayed = context.is_displayed(element)?;
        Ok(Check::from_bool(!displayed, visibility(displayed)))
    }

    fn accepts_when_unresolvable(&self) -> bool {
        true
    }
}

fn visibility(displayed: bool) -> &'static str {
    if displayed {
        "visible"
    } else {
        "hidden"
    }
}

/// Element is present in the document
#[derive(Debug, Clone, Copy, Default)]
pub struct Exist;

impl Condition for Exist {
    fn name(&self) -> String {
        "exist".into()
    }

    fn check(
        &self,
        _context: &dyn ResolutionContext,
        element: &ElementHandle,
    ) -> EsperarResult<Check> {
        Ok(Check::accept(element.to_string()))
    }
}

/// Normalized text contains the expected fragment
#[derive(Debug, Clone)]
pub struct Text {
    expected: String,
}

impl Condition for Text {
    fn name(&self) -> String {
        format!("have text '{}'", self.expected)
    }

    fn check(
        &self,
        context: &dyn ResolutionContext,
        element: &ElementHandle,
    ) -> EsperarResult<Check> {
        let actual = context.text(element)?;
        let holds = normalize(&actual).contains(&normalize(&self.expected));
        Ok(Check::from_bool(holds, actual))
    }
}

/// Normalized text equals the expected text
#[derive(Debug, Clone)]
pub struct ExactText {
    expected: String,
}

impl Condition for ExactText {
    fn name(&self) -> String {
        format!("have exact text '{}'", self.expected)
    }

    fn check(
        &self,
        context: &dyn ResolutionContext,
        element: &ElementHandle,
    ) -> EsperarResult<Check> {
        let actual = context.text(element)?;
        let holds = normalize(&actual) == normalize(&self.expected);
        Ok(Check::from_bool(holds, actual))
    }
}

/// Attribute is present
#[derive(Debug, Clone)]
pub struct Attribute {
    name: String,
}

impl Condition for Attribute {
    fn name(&self) -> String {
        format!("have attribute '{}'", self.name)
    }

    fn check(
        &self,
        context: &dyn ResolutionContext,
        element: &ElementHandle,
    ) -> EsperarResult<Check> {
        let value = context.attribute(element, &self.name)?;
        Ok(Check::from_bool(
            value.is_some(),
            value.unwrap_or_else(|| "<absent>".into()),
        ))
    }
}

/// Attribute has exactly the given value
#[derive(Debug, Clone)]
pub struct AttributeValue {
    name: String,
    value: String,
}

impl Condition for AttributeValue {
    fn name(&self) -> String {
        format!("have attribute {}=\"{}\"", self.name, self.value)
    }

    fn check(
        &self,
        context: &dyn ResolutionContext,
        element: &ElementHandle,
    ) -> EsperarResult<Check> {
        match context.attribute(element, &self.name)? {
            Some(actual) => Ok(Check::from_bool(actual == self.value, actual)),
            None => Ok(Check::reject("<absent>")),
        }
    }
}

/// `class` attribute contains the given class name
#[derive(Debug, Clone)]
pub struct CssClass {
    class: String,
}

impl Condition for CssClass {
    fn name(&self) -> String {
        format!("have css class '{}'", self.class)
    }

    fn check(
        &self,
        context: &dyn ResolutionContext,
        element: &ElementHandle,
    ) -> EsperarResult<Check> {
        let classes = context.attribute(element, "class")?.unwrap_or_default();
        let holds = classes.split_whitespace().any(|c| c == self.class);
        Ok(Check::from_bool(holds, classes))
    }
}

/// Normalized `value` contains the expected fragment
#[derive(Debug, Clone)]
pub struct Value {
    expected: String,
}

impl Condition for Value {
    fn name(&self) -> String {
        format!("have value '{}'", self.expected)
    }

    fn check(
        &self,
        context: &dyn ResolutionContext,
        element: &ElementHandle,
    ) -> EsperarResult<Check> {
        let actual = context.attribute(element, "value")?.unwrap_or_default();
        let holds = normalize(&actual).contains(&normalize(&self.expected));
        Ok(Check::from_bool(holds, actual))
    }
}

/// Negation: flips both the verdict and the missing-element policy
#[derive(Debug, Clone)]
pub struct Not<C> {
    inner: C,
}

impl<C: Condition> Condition for Not<C> {
    fn name(&self) -> String {
        format!("not {}", self.inner.name())
    }

    fn check(
        &self,
        context: &dyn ResolutionContext,
        element: &ElementHandle,
    ) -> EsperarResult<Check> {
        let check = self.inner.check(context, element)?;
        Ok(Check::from_bool(!check.is_accepted(), check.actual))
    }

    fn accepts_when_unresolvable(&self) -> bool {
        !self.inner.accepts_when_unresolvable()
    }
}

/// Element is displayed
#[must_use]
pub const fn visible() -> Visible {
    Visible
}

/// Element is hidden or absent
#[must_use]
pub const fn hidden() -> Hidden {
    Hidden
}

/// Element exists
#[must_use]
pub const fn exist() -> Exist {
    Exist
}

/// Text contains `expected` (normalized)
#[must_use]
pub fn text(expected: impl Into<String>) -> Text {
    Text {
        expected: expected.into(),
    }
}

/// Text equals `expected` (normalized)
#[must_use]
pub fn exact_text(expected: impl Into<String>) -> ExactText {
    ExactText {
        expected: expected.into(),
    }
}

/// Attribute `name` is present
#[must_use]
pub fn attribute(name: impl Into<String>) -> Attribute {
    Attribute { name: name.into() }
}

/// Attribute `name` equals `value`
#[must_use]
pub fn attribute_value(name: impl Into<String>, value: impl Into<String>) -> AttributeValue {
    AttributeValue {
        name: name.into(),
        value: value.into(),
    }
}

/// Element carries css class `class`
#[must_use]
pub fn css_class(class: impl Into<String>) -> CssClass {
    CssClass {
        class: class.into(),
    }
}

/// Input value contains `expected` (normalized)
#[must_use]
pub fn value(expected: impl Into<String>) -> Value {
    Value {
        expected: expected.into(),
    }
}

/// Negate a condition
#[must_use]
pub const fn not<C: Condition>(inner: C) -> Not<C> {
    Not { inner }
}

// =============================================================================
// EVALUATION
// =============================================================================

/// One attempt: resolve the chain, then check the condition.
///
/// Rejection is retryable. A resolution failure is a `Missing` success when
/// the condition accepts unresolvable chains and retryable otherwise.
pub fn evaluate(
    condition: &dyn Condition,
    chain: &LocatorChain,
    context: &dyn ResolutionContext,
) -> RetryOutcome {
    let checked = chain
        .resolve(context)
        .and_then(|handle| condition.check(context, &handle));
    match checked {
        Ok(check) if check.is_accepted() => RetryOutcome::Success(CommandOutput::Element(chain.clone())),
        Ok(check) => RetryOutcome::Retryable(EsperarError::PredicateNotSatisfied {
            locator: chain.to_string(),
            condition: condition.name(),
            actual: check.actual,
        }),
        Err(error) if error.is_resolution_failure() && condition.accepts_when_unresolvable() => {
            RetryOutcome::Success(CommandOutput::Missing)
        }
        Err(error) => RetryOutcome::from_error(error),
    }
}

/// A fixed condition exposed as a registry command
#[derive(Clone)]
pub struct ConditionCommand {
    condition: Arc<dyn Condition>,
}

impl ConditionCommand {
    /// Wrap a condition
    #[must_use]
    pub fn new(condition: impl Condition + 'static) -> Self {
        Self {
            condition: Arc::new(condition),
        }
    }
}

impl std::fmt::Debug for ConditionCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConditionCommand")
            .field("condition", &self.condition.name())
            .finish()
    }
}

impl Command for ConditionCommand {
    fn resolution(&self) -> Resolution {
        Resolution::Lazy
    }

    fn execute(&self, invocation: &Invocation<'_>) -> RetryOutcome {
        if let Err(error) = invocation.expect_arity(&self.condition.name(), 0, 0) {
            return RetryOutcome::from_error(error);
        }
        evaluate(self.condition.as_ref(), invocation.chain, invocation.context)
    }
}

/// `should_have_text` / `should_have_exact_text`, expected text as argument
#[derive(Debug, Clone, Copy)]
pub struct TextConditionCommand {
    exact: bool,
}

impl TextConditionCommand {
    /// Contains-match on normalized text
    #[must_use]
    pub const fn contains() -> Self {
        Self { exact: false }
    }

    /// Equality on normalized text
    #[must_use]
    pub const fn exact() -> Self {
        Self { exact: true }
    }
}

impl Command for TextConditionCommand {
    fn resolution(&self) -> Resolution {
        Resolution::Lazy
    }

    fn execute(&self, invocation: &Invocation<'_>) -> RetryOutcome {
        let name = if self.exact {
            "should_have_exact_text"
        } else {
            "should_have_text"
        };
        let expected = match invocation
            .expect_arity(name, 1, 1)
            .and_then(|()| invocation.str_arg(name, 0))
        {
            Ok(expected) => expected,
            Err(error) => return RetryOutcome::from_error(error),
        };
        if self.exact {
            evaluate(&exact_text(expected), invocation.chain, invocation.context)
        } else {
            evaluate(&text(expected), invocation.chain, invocation.context)
        }
    }
}
