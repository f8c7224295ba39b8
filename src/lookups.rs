//! Best-effort context lookups
//!
//! Secondary lookups that decorate a listing (hub name, project details,
//! and so on) run concurrently. A failed lookup becomes a warning instead of
//! failing the call.

use std::collections::BTreeMap;
use std::future::Future;

use futures::future::{BoxFuture, join_all};
use serde::Serialize;
use tracing::warn;

use crate::Result;

/// A named lookup
pub struct Lookup<'a, T> {
    name: String,
    future: BoxFuture<'a, Result<T>>,
}

impl<'a, T> Lookup<'a, T> {
    /// Wrap a future under a name
    pub fn new<F>(name: impl Into<String>, future: F) -> Self
    where
        F: Future<Output = Result<T>> + Send + 'a,
    {
        Self {
            name: name.into(),
            future: Box::pin(future),
        }
    }
}

/// Successful lookups by name, plus one warning per failure
#[derive(Debug, Clone, Serialize)]
pub struct LookupResults<T> {
    /// Values of lookups that succeeded
    pub values: BTreeMap<String, T>,
    /// `"<name>: <error>"` for each lookup that failed
    pub warnings: Vec<String>,
}

impl<T> Default for LookupResults<T> {
    fn default() -> Self {
        Self {
            values: BTreeMap::new(),
            warnings: Vec::new(),
        }
    }
}

impl<T> LookupResults<T> {
    /// Value of a lookup, if it succeeded
    pub fn get(&self, name: &str) -> Option<&T> {
        self.values.get(name)
    }
}

/// Run all lookups concurrently
pub async fn gather_lookups<T>(lookups: Vec<Lookup<'_, T>>) -> LookupResults<T> {
    let (names, futures): (Vec<String>, Vec<_>) =
        lookups.into_iter().map(|l| (l.name, l.future)).unzip();

    let mut results = LookupResults::default();
    for (name, outcome) in names.into_iter().zip(join_all(futures).await) {
        match outcome {
            Ok(value) => {
                results.values.insert(name, value);
            }
            Err(e) => {
                warn!(lookup = %name, error = %e, "Context lookup failed");
                results.warnings.push(format!("{name}: {e}"));
            }
        }
    }
    results
}

/// Run a primary call alongside its lookups
///
/// Only the primary call's failure is fatal.
pub async fn with_context<P, F, T>(
    primary: F,
    lookups: Vec<Lookup<'_, T>>,
) -> Result<(P, LookupResults<T>)>
where
    F: Future<Output = Result<P>>,
{
    let (primary, context) = futures::join!(primary, gather_lookups(lookups));
    Ok((primary?, context))
}
