//! Test units, candidates, and the context a test body executes in.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::deadline::{DeadlineExceeded, DeadlineGuard};

/// Why a test body did not complete successfully.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TestFault {
    /// Expected vs actual mismatch; classified as a failure.
    #[error("assertion failed: {0}")]
    Assertion(String),
    /// Any other fault; classified as an error.
    #[error("{0}")]
    Unexpected(String),
    /// A deadline checkpoint fired; classified as timed out.
    #[error(transparent)]
    Deadline(#[from] DeadlineExceeded),
}

impl TestFault {
    /// Assertion-violation fault.
    pub fn assertion(message: impl Into<String>) -> Self {
        Self::Assertion(message.into())
    }

    /// Unexpected fault.
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }
}

impl From<std::io::Error> for TestFault {
    fn from(err: std::io::Error) -> Self {
        Self::Unexpected(format!("io error: {err}"))
    }
}

/// Fail with an assertion fault unless `expected == actual`.
pub fn expect_eq<T: PartialEq + fmt::Debug>(expected: T, actual: T) -> Result<(), TestFault> {
    if expected == actual {
        Ok(())
    } else {
        Err(TestFault::Assertion(format!(
            "expected {expected:?}, got {actual:?}"
        )))
    }
}

/// Fail with an assertion fault unless `condition` holds.
pub fn expect_true(condition: bool, message: impl Into<String>) -> Result<(), TestFault> {
    if condition {
        Ok(())
    } else {
        Err(TestFault::Assertion(message.into()))
    }
}

/// One applied mutation, as supplied by the mutant generator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MutationDescriptor {
    /// Stable mutant id.
    pub id: String,
    /// Mutation operator that produced it.
    pub mutator: String,
    /// Human-readable description of the change.
    pub description: String,
}

impl MutationDescriptor {
    /// Build a descriptor.
    pub fn new(
        id: impl Into<String>,
        mutator: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            mutator: mutator.into(),
            description: description.into(),
        }
    }
}

/// Identity of a candidate: the code unit plus the mutation applied, if any.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CandidateId {
    /// Code unit under test.
    pub code_unit: String,
    /// `None` for the baseline.
    #[serde(default)]
    pub mutation: Option<MutationDescriptor>,
}

impl CandidateId {
    /// Identity of the unmutated code.
    pub fn baseline(code_unit: impl Into<String>) -> Self {
        Self {
            code_unit: code_unit.into(),
            mutation: None,
        }
    }

    /// Identity of one mutant.
    pub fn mutant(code_unit: impl Into<String>, mutation: MutationDescriptor) -> Self {
        Self {
            code_unit: code_unit.into(),
            mutation: Some(mutation),
        }
    }

    /// True for the unmutated code.
    pub fn is_baseline(&self) -> bool {
        self.mutation.is_none()
    }

    /// Mutant id, or `"baseline"`.
    pub fn mutant_id(&self) -> &str {
        self.mutation.as_ref().map_or("baseline", |m| m.id.as_str())
    }
}

impl fmt::Display for CandidateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.mutation {
            Some(mutation) => write!(f, "{}#{}", self.code_unit, mutation.id),
            None => write!(f, "{}", self.code_unit),
        }
    }
}

/// Original code or one mutant, in loaded executable form.
pub struct Candidate<C> {
    id: CandidateId,
    code: Arc<C>,
}

impl<C> Candidate<C> {
    /// Wrap loaded code under an identity.
    pub fn new(id: CandidateId, code: C) -> Self {
        Self {
            id,
            code: Arc::new(code),
        }
    }

    /// Unmutated candidate.
    pub fn baseline(code_unit: impl Into<String>, code: C) -> Self {
        Self::new(CandidateId::baseline(code_unit), code)
    }

    /// Mutant candidate.
    pub fn mutant(code_unit: impl Into<String>, mutation: MutationDescriptor, code: C) -> Self {
        Self::new(CandidateId::mutant(code_unit, mutation), code)
    }

    /// Candidate identity.
    pub fn id(&self) -> &CandidateId {
        &self.id
    }

    /// Loaded code.
    pub fn code(&self) -> &C {
        &self.code
    }

    pub(crate) fn shared_code(&self) -> Arc<C> {
        Arc::clone(&self.code)
    }
}

impl<C> fmt::Debug for Candidate<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Candidate").field("id", &self.id).finish_non_exhaustive()
    }
}

/// What a test body sees while it runs.
pub struct TestContext<'a, C> {
    code: &'a C,
    guard: &'a DeadlineGuard,
    test_name: &'a str,
}

impl<'a, C> TestContext<'a, C> {
    pub(crate) fn new(code: &'a C, guard: &'a DeadlineGuard, test_name: &'a str) -> Self {
        Self {
            code,
            guard,
            test_name,
        }
    }

    /// Candidate code under test.
    pub fn code(&self) -> &'a C {
        self.code
    }

    /// Deadline guard of the enclosing execution context.
    pub fn guard(&self) -> &'a DeadlineGuard {
        self.guard
    }

    /// Explicit checkpoint against the context deadline.
    pub fn checkpoint(&self) -> Result<(), DeadlineExceeded> {
        self.guard.checkpoint()
    }

    /// Qualified name of the running test.
    pub fn test_name(&self) -> &'a str {
        self.test_name
    }
}

type TestBody<C> = Arc<dyn Fn(&TestContext<'_, C>) -> Result<(), TestFault> + Send + Sync>;

/// An executable test case resolved by test discovery.
pub struct TestUnit<C> {
    name: String,
    body: TestBody<C>,
    excluded: bool,
}

impl<C> TestUnit<C> {
    /// New test unit.
    pub fn new<F>(name: impl Into<String>, body: F) -> Self
    where
        F: Fn(&TestContext<'_, C>) -> Result<(), TestFault> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            body: Arc::new(body),
            excluded: false,
        }
    }

    /// Mark as ignored: discovered but never executed.
    pub fn excluded(mut self) -> Self {
        self.excluded = true;
        self
    }

    /// Qualified test name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// True if the unit is never executed.
    pub fn is_excluded(&self) -> bool {
        self.excluded
    }

    pub(crate) fn execute(&self, ctx: &TestContext<'_, C>) -> Result<(), TestFault> {
        (self.body)(ctx)
    }
}

impl<C> Clone for TestUnit<C> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            body: Arc::clone(&self.body),
            excluded: self.excluded,
        }
    }
}

impl<C> fmt::Debug for TestUnit<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestUnit")
            .field("name", &self.name)
            .field("excluded", &self.excluded)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candidate_identity_display_and_baseline_flag() {
        let baseline = CandidateId::baseline("calc::add");
        assert!(baseline.is_baseline());
        assert_eq!(baseline.to_string(), "calc::add");
        assert_eq!(baseline.mutant_id(), "baseline");

        let mutant = CandidateId::mutant(
            "calc::add",
            MutationDescriptor::new("m1", "return_vals", "replace 1 with 0"),
        );
        assert!(!mutant.is_baseline());
        assert_eq!(mutant.to_string(), "calc::add#m1");
        assert_eq!(mutant.mutant_id(), "m1");
    }

    #[test]
    fn expect_helpers_produce_assertion_faults() {
        assert!(expect_eq(1, 1).is_ok());
        assert_eq!(
            expect_eq(1, 2),
            Err(TestFault::Assertion("expected 1, got 2".to_string()))
        );
        assert_eq!(
            expect_true(false, "must hold"),
            Err(TestFault::Assertion("must hold".to_string()))
        );
    }

    #[test]
    fn unit_executes_against_context_code() {
        let unit: TestUnit<i32> = TestUnit::new("reads_code", |ctx| expect_eq(7, *ctx.code()));
        let guard = DeadlineGuard::new();
        let ctx = TestContext::new(&7, &guard, unit.name());
        assert!(unit.execute(&ctx).is_ok());
        assert!(!unit.clone().is_excluded());
        assert!(unit.excluded().is_excluded());
    }

    #[test]
    fn deadline_fault_converts_from_exceeded() {
        let fault: TestFault = DeadlineExceeded { deadline_ms: 5 }.into();
        assert!(matches!(fault, TestFault::Deadline(_)));
    }
}
