//! Case-insensitive exact-then-partial matching

use super::{CandidateSummary, NamedEntity, ResolutionSource};
use crate::{Error, Result};

/// Cap on candidates listed in ambiguity and not-found errors
pub const MAX_CANDIDATES: usize = 10;

/// How a candidate matched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MatchKind {
    Exact,
    Partial,
}

pub(crate) fn normalize(value: &str) -> String {
    value.trim().to_lowercase()
}

/// Compare a candidate name against an already normalized needle
pub(crate) fn classify(name: &str, needle: &str) -> Option<MatchKind> {
    let name = normalize(name);
    if name == needle {
        Some(MatchKind::Exact)
    } else if name.contains(needle) {
        Some(MatchKind::Partial)
    } else {
        None
    }
}

pub(crate) fn summarize<'a, E, I>(entities: I) -> Vec<CandidateSummary>
where
    E: NamedEntity + 'a,
    I: IntoIterator<Item = &'a E>,
{
    entities
        .into_iter()
        .take(MAX_CANDIDATES)
        .map(CandidateSummary::from_entity)
        .collect()
}

/// Unique exact match wins, then unique partial match
///
/// `pool` supplies the not-found sample and pool size only when needed.
pub(crate) fn pick<'a, E, P>(
    target: &str,
    exact: &[&'a E],
    partial: &[&'a E],
    pool: P,
) -> Result<(&'a E, ResolutionSource)>
where
    E: NamedEntity,
    P: FnOnce() -> (Vec<CandidateSummary>, usize),
{
    match exact {
        [only] => return Ok((*only, ResolutionSource::ExactName)),
        [] => {}
        many => return Err(ambiguous(target, many)),
    }

    match partial {
        [only] => Ok((*only, ResolutionSource::PartialName)),
        [] => {
            let (sample, pool_size) = pool();
            Err(Error::NotFound {
                target: target.to_string(),
                sample,
                pool_size,
            })
        }
        many => Err(ambiguous(target, many)),
    }
}

pub(crate) fn ambiguous<E: NamedEntity>(target: &str, matches: &[&E]) -> Error {
    Error::AmbiguousMatch {
        target: target.to_string(),
        candidates: summarize(matches.iter().copied()),
        total: matches.len(),
    }
}
