//! Named assertions evaluated against every response a VU receives.
//!
//! Checks are registered once on the scenario rather than written inline in the scenario
//! function. A failing check is recorded and never stops the iteration.
use crate::http::Response;
use crate::RequestError;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

type CheckFn = dyn Fn(&Response) -> bool + Send + Sync;

#[derive(Clone)]
pub enum CheckPredicate {
    /// Status is one of the listed codes.
    Status(Vec<u16>),
    /// Response arrived within the given duration.
    MaxDuration(Duration),
    /// Header is present, and equal to the value if one is given.
    Header(String, Option<String>),
    BodyContains(String),
    Custom(Arc<CheckFn>),
}

impl fmt::Debug for CheckPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckPredicate::Status(codes) => f.debug_tuple("Status").field(codes).finish(),
            CheckPredicate::MaxDuration(d) => f.debug_tuple("MaxDuration").field(d).finish(),
            CheckPredicate::Header(name, value) => {
                f.debug_tuple("Header").field(name).field(value).finish()
            }
            CheckPredicate::BodyContains(s) => f.debug_tuple("BodyContains").field(s).finish(),
            CheckPredicate::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Check {
    pub name: String,
    pub predicate: CheckPredicate,
}

impl Check {
    pub fn new(name: &str, predicate: CheckPredicate) -> Self {
        Self {
            name: name.to_string(),
            predicate,
        }
    }

    pub fn status(name: &str, codes: &[u16]) -> Self {
        Self::new(name, CheckPredicate::Status(codes.to_vec()))
    }

    pub fn max_duration(name: &str, limit: Duration) -> Self {
        Self::new(name, CheckPredicate::MaxDuration(limit))
    }

    pub fn custom<F>(name: &str, f: F) -> Self
    where
        F: Fn(&Response) -> bool + Send + Sync + 'static,
    {
        Self::new(name, CheckPredicate::Custom(Arc::new(f)))
    }

    /// A request that failed outright fails every check.
    pub fn evaluate(&self, outcome: Result<&Response, &RequestError>) -> bool {
        let Ok(res) = outcome else {
            return false;
        };

        match &self.predicate {
            CheckPredicate::Status(codes) => codes.contains(&res.status),
            CheckPredicate::MaxDuration(limit) => res.duration < *limit,
            CheckPredicate::Header(name, expected) => match (res.header(name), expected) {
                (Some(actual), Some(expected)) => actual == expected,
                (Some(_), None) => true,
                (None, _) => false,
            },
            CheckPredicate::BodyContains(needle) => res.text().contains(needle.as_str()),
            CheckPredicate::Custom(f) => f(res),
        }
    }
}

/// The checks registered on a scenario, shared by all of its VUs.
#[derive(Clone, Debug, Default)]
pub struct CheckSet {
    checks: Arc<Vec<Check>>,
}

impl CheckSet {
    pub fn new(checks: Vec<Check>) -> Self {
        Self {
            checks: Arc::new(checks),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Check> {
        self.checks.iter()
    }

    pub fn len(&self) -> usize {
        self.checks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(status: u16, millis: u64) -> Response {
        Response::new(
            status,
            Duration::from_millis(millis),
            vec![("retry-after".to_string(), "1".to_string())],
            b"hello world".to_vec(),
        )
    }

    #[test]
    fn status_in_set() {
        let check = Check::status("status is 200 or 429", &[200, 429]);
        assert!(check.evaluate(Ok(&response(200, 5))));
        assert!(check.evaluate(Ok(&response(429, 5))));
        assert!(!check.evaluate(Ok(&response(500, 5))));
    }

    #[test]
    fn duration_limit_is_exclusive() {
        let check = Check::max_duration("response time <50ms", Duration::from_millis(50));
        assert!(check.evaluate(Ok(&response(200, 49))));
        assert!(!check.evaluate(Ok(&response(200, 50))));
    }

    #[test]
    fn headers_and_body() {
        let present = Check::new(
            "has retry-after",
            CheckPredicate::Header("Retry-After".to_string(), None),
        );
        let equals = Check::new(
            "retry in 2",
            CheckPredicate::Header("retry-after".to_string(), Some("2".to_string())),
        );
        let body = Check::new("says hello", CheckPredicate::BodyContains("hello".to_string()));
        let res = response(429, 1);
        assert!(present.evaluate(Ok(&res)));
        assert!(!equals.evaluate(Ok(&res)));
        assert!(body.evaluate(Ok(&res)));
    }

    #[test]
    fn errors_fail_every_check() {
        let err = RequestError::Network("connection refused".to_string());
        let check = Check::custom("always", |_| true);
        assert!(!check.evaluate(Err(&err)));
    }
}
