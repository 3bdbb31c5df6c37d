//! Iteration policies and the per-round accumulator.

use std::fmt;

/// Accumulator handed to a stage handler.
///
/// The first handler call of a round receives the upstream emission as
/// `Seed`; every later call receives the previous handler result as
/// `Partial`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fold<S, R> {
    /// Upstream emission that started the round.
    Seed(S),
    /// Result of the previous handler call in this round.
    Partial(R),
}

impl<S, R> Fold<S, R> {
    /// The seed, if this is the first call of the round.
    pub fn seed(&self) -> Option<&S> {
        match self {
            Fold::Seed(seed) => Some(seed),
            Fold::Partial(_) => None,
        }
    }

    /// The previous result, if any.
    pub fn partial(&self) -> Option<&R> {
        match self {
            Fold::Seed(_) => None,
            Fold::Partial(partial) => Some(partial),
        }
    }

    /// Whether this is the first call of the round.
    pub fn is_seed(&self) -> bool {
        matches!(self, Fold::Seed(_))
    }

    /// Collapse both cases into one value.
    pub fn fold_with<T>(self, seed: impl FnOnce(S) -> T, partial: impl FnOnce(R) -> T) -> T {
        match self {
            Fold::Seed(s) => seed(s),
            Fold::Partial(r) => partial(r),
        }
    }
}

impl<T> Fold<T, T> {
    /// The carried value, whichever case it is.
    pub fn into_inner(self) -> T {
        match self {
            Fold::Seed(value) | Fold::Partial(value) => value,
        }
    }
}

type CountFn<S> = Box<dyn Fn(&S) -> usize>;
type PredicateFn<R> = Box<dyn FnMut(&R) -> bool>;
type PredicateFactory<S, R> = Box<dyn Fn(&S) -> PredicateFn<R>>;

/// How many records a stage pulls per round.
///
/// Resolved once per round against the upstream emission.
pub enum IterationPolicy<S, R> {
    /// Exactly one record per upstream emission.
    Once,
    /// A fixed number of records.
    Fixed(usize),
    /// A number computed from the upstream emission.
    Computed(CountFn<S>),
    /// Pull until the predicate built from the upstream emission accepts the
    /// latest handler result. Checked after every call, never before the
    /// first.
    Until(PredicateFactory<S, R>),
}

impl<S, R> IterationPolicy<S, R> {
    /// Policy computing the record count from the upstream emission.
    pub fn computed<F>(count: F) -> Self
    where
        F: Fn(&S) -> usize + 'static,
    {
        IterationPolicy::Computed(Box::new(count))
    }

    /// Policy looping until a predicate over the accumulator holds.
    ///
    /// `factory` runs once per round with the upstream emission and returns
    /// the predicate for that round.
    pub fn until<F, P>(factory: F) -> Self
    where
        S: 'static,
        R: 'static,
        F: Fn(&S) -> P + 'static,
        P: FnMut(&R) -> bool + 'static,
    {
        IterationPolicy::Until(Box::new(move |seed: &S| {
            Box::new(factory(seed)) as PredicateFn<R>
        }))
    }

    pub(crate) fn plan(&self, seed: &S) -> RoundPlan<R> {
        match self {
            IterationPolicy::Once => RoundPlan::Count(1),
            IterationPolicy::Fixed(count) => RoundPlan::Count(*count),
            IterationPolicy::Computed(count) => RoundPlan::Count(count(seed)),
            IterationPolicy::Until(factory) => RoundPlan::Until(factory(seed)),
        }
    }
}

impl<S, R> Default for IterationPolicy<S, R> {
    fn default() -> Self {
        IterationPolicy::Once
    }
}

impl<S, R> From<usize> for IterationPolicy<S, R> {
    fn from(count: usize) -> Self {
        IterationPolicy::Fixed(count)
    }
}

impl<S, R> fmt::Debug for IterationPolicy<S, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IterationPolicy::Once => write!(f, "Once"),
            IterationPolicy::Fixed(count) => write!(f, "Fixed({})", count),
            IterationPolicy::Computed(_) => write!(f, "Computed(..)"),
            IterationPolicy::Until(_) => write!(f, "Until(..)"),
        }
    }
}

/// A policy resolved for one round.
pub(crate) enum RoundPlan<R> {
    Count(usize),
    Until(PredicateFn<R>),
}

impl<R> RoundPlan<R> {
    /// Whether the round is over before pulling the next record.
    pub(crate) fn exhausted_after(&self, completed: usize) -> bool {
        match self {
            RoundPlan::Count(count) => completed >= *count,
            RoundPlan::Until(_) => false,
        }
    }

    /// Whether the latest result ends the round.
    pub(crate) fn accepts(&mut self, result: &R) -> bool {
        match self {
            RoundPlan::Count(_) => false,
            RoundPlan::Until(predicate) => predicate(result),
        }
    }
}
