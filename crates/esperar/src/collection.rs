//! Collection conditions.
//!
//! Same contract as [`Condition`](crate::condition::Condition), but over
//! every current match of an [`ElementsCollection`]. An empty match list is
//! an observation like any other; only a missing parent counts as
//! unresolvable.

use serde_json::Value;

use crate::command::{CommandOutput, RetryOutcome};
use crate::condition::{normalize, Check};
use crate::locator::ElementsCollection;
use crate::result::{EsperarError, EsperarResult};
use crate::session::{ElementHandle, ResolutionContext};

/// Predicate over an ordered list of resolved elements
pub trait CollectionCondition: Send + Sync {
    /// Human-readable description, e.g. `have size 3`
    fn name(&self) -> String;

    /// Reject malformed expectations before the first attempt
    fn validate(&self) -> EsperarResult<()> {
        Ok(())
    }

    /// Inspect the elements
    fn check(
        &self,
        context: &dyn ResolutionContext,
        elements: &[ElementHandle],
    ) -> EsperarResult<Check>;

    /// Whether a collection whose parent cannot be resolved satisfies this
    fn accepts_when_unresolvable(&self) -> bool {
        false
    }
}

impl<C: CollectionCondition + ?Sized> CollectionCondition for &C {
    fn name(&self) -> String {
        (**self).name()
    }

    fn validate(&self) -> EsperarResult<()> {
        (**self).validate()
    }

    fn check(
        &self,
        context: &dyn ResolutionContext,
        elements: &[ElementHandle],
    ) -> EsperarResult<Check> {
        (**self).check(context, elements)
    }

    fn accepts_when_unresolvable(&self) -> bool {
        (**self).accepts_when_unresolvable()
    }
}

/// Whether every expected fragment occurs in at least one actual text.
///
/// Both sides are normalized. Actual items are not consumed, so one actual
/// text may satisfy several expected fragments, and the lengths need not
/// agree.
#[must_use]
pub fn matches_in_any_order<A: AsRef<str>, E: AsRef<str>>(actual: &[A], expected: &[E]) -> bool {
    let actual: Vec<String> = actual.iter().map(|a| normalize(a.as_ref())).collect();
    expected.iter().all(|fragment| {
        let fragment = normalize(fragment.as_ref());
        actual.iter().any(|text| text.contains(&fragment))
    })
}

fn texts_of(
    context: &dyn ResolutionContext,
    elements: &[ElementHandle],
) -> EsperarResult<Vec<String>> {
    elements.iter().map(|handle| context.text(handle)).collect()
}

fn describe(texts: &[String]) -> String {
    format!("[{}]", texts.join(", "))
}

fn require_expected(name: &str, expected: &[String]) -> EsperarResult<()> {
    if expected.is_empty() {
        Err(EsperarError::invalid_argument(format!(
            "{name} needs at least one expected text"
        )))
    } else {
        Ok(())
    }
}

// =============================================================================
// BUILT-IN COLLECTION CONDITIONS
// =============================================================================

/// Exactly `n` matches; a missing parent counts as zero
#[derive(Debug, Clone, Copy)]
pub struct Size {
    expected: usize,
}

impl CollectionCondition for Size {
    fn name(&self) -> String {
        format!("have size {}", self.expected)
    }

    fn check(
        &self,
        _context: &dyn ResolutionContext,
        elements: &[ElementHandle],
    ) -> EsperarResult<Check> {
        Ok(Check::from_bool(
            elements.len() == self.expected,
            elements.len().to_string(),
        ))
    }

    fn accepts_when_unresolvable(&self) -> bool {
        self.expected == 0
    }
}

/// Strictly more than `n` matches
#[derive(Debug, Clone, Copy)]
pub struct SizeGreaterThan {
    bound: usize,
}

impl CollectionCondition for SizeGreaterThan {
    fn name(&self) -> String {
        format!("have size greater than {}", self.bound)
    }

    fn check(
        &self,
        _context: &dyn ResolutionContext,
        elements: &[ElementHandle],
    ) -> EsperarResult<Check> {
        Ok(Check::from_bool(
            elements.len() > self.bound,
            elements.len().to_string(),
        ))
    }
}

/// Same length, each text contains the expected fragment at its position
#[derive(Debug, Clone)]
pub struct Texts {
    expected: Vec<String>,
    exact: bool,
}

impl CollectionCondition for Texts {
    fn name(&self) -> String {
        let kind = if self.exact { "exact texts" } else { "texts" };
        format!("have {kind} {}", describe(&self.expected))
    }

    fn validate(&self) -> EsperarResult<()> {
        require_expected(if self.exact { "exact_texts" } else { "texts" }, &self.expected)
    }

    fn check(
        &self,
        context: &dyn ResolutionContext,
        elements: &[ElementHandle],
    ) -> EsperarResult<Check> {
        let actual = texts_of(context, elements)?;
        let holds = actual.len() == self.expected.len()
            && actual.iter().zip(&self.expected).all(|(a, e)| {
                let (a, e) = (normalize(a), normalize(e));
                if self.exact {
                    a == e
                } else {
                    a.contains(&e)
                }
            });
        Ok(Check::from_bool(holds, describe(&actual)))
    }
}

/// Every expected fragment is contained in some element's text
#[derive(Debug, Clone)]
pub struct TextsInAnyOrder {
    expected: Vec<String>,
}

impl CollectionCondition for TextsInAnyOrder {
    fn name(&self) -> String {
        format!("have texts in any order {}", describe(&self.expected))
    }

    fn validate(&self) -> EsperarResult<()> {
        require_expected("texts_in_any_order", &self.expected)
    }

    fn check(
        &self,
        context: &dyn ResolutionContext,
        elements: &[ElementHandle],
    ) -> EsperarResult<Check> {
        let actual = texts_of(context, elements)?;
        Ok(Check::from_bool(
            matches_in_any_order(&actual, &self.expected),
            describe(&actual),
        ))
    }
}

/// Exactly `n` elements
#[must_use]
pub const fn size(expected: usize) -> Size {
    Size { expected }
}

/// More than `bound` elements
#[must_use]
pub const fn size_greater_than(bound: usize) -> SizeGreaterThan {
    SizeGreaterThan { bound }
}

/// Position-wise contains-match on normalized texts
#[must_use]
pub fn texts<I, S>(expected: I) -> Texts
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    Texts {
        expected: expected.into_iter().map(Into::into).collect(),
        exact: false,
    }
}

/// Position-wise equality on normalized texts
#[must_use]
pub fn exact_texts<I, S>(expected: I) -> Texts
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    Texts {
        expected: expected.into_iter().map(Into::into).collect(),
        exact: true,
    }
}

/// Order-insensitive contains-match
#[must_use]
pub fn texts_in_any_order<I, S>(expected: I) -> TextsInAnyOrder
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    TextsInAnyOrder {
        expected: expected.into_iter().map(Into::into).collect(),
    }
}

/// One attempt: resolve the collection, then check it.
///
/// Success carries the number of matches observed.
pub fn evaluate_collection(
    condition: &dyn CollectionCondition,
    collection: &ElementsCollection,
    context: &dyn ResolutionContext,
) -> RetryOutcome {
    if let Err(error) = condition.validate() {
        return RetryOutcome::from_error(error);
    }
    let checked = collection.resolve(context).and_then(|elements| {
        condition
            .check(context, &elements)
            .map(|check| (check, elements.len()))
    });
    match checked {
        Ok((check, count)) if check.is_accepted() => {
            RetryOutcome::Success(CommandOutput::Value(Value::from(count)))
        }
        Ok((check, _)) => RetryOutcome::Retryable(EsperarError::PredicateNotSatisfied {
            locator: collection.to_string(),
            condition: condition.name(),
            actual: check.actual,
        }),
        Err(error) if error.is_resolution_failure() && condition.accepts_when_unresolvable() => {
            RetryOutcome::Success(CommandOutput::Missing)
        }
        Err(error) => RetryOutcome::from_error(error),
    }
}
