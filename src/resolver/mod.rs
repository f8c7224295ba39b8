//! Name-to-identifier resolution
//!
//! Turns user-supplied names into remote ids: flat collections (hubs,
//! projects) by exact-then-partial match, folder trees by bounded
//! breadth-first search.

mod folders;
mod matching;

use serde::{Deserialize, Serialize};
use tracing::debug;

pub use folders::{FolderNode, FolderResolution, FolderSource, resolve_folder_by_name};
pub use matching::MAX_CANDIDATES;

use crate::{Error, Result};

/// Anything with an id and a display name
pub trait NamedEntity {
    /// Remote identifier
    fn id(&self) -> &str;
    /// Display name
    fn name(&self) -> &str;
}

/// Id and name of a candidate, as listed in resolution errors
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateSummary {
    /// Remote identifier
    pub id: String,
    /// Display name
    pub name: String,
}

impl CandidateSummary {
    /// Create a summary
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }

    pub(crate) fn from_entity<E: NamedEntity + ?Sized>(entity: &E) -> Self {
        Self::new(entity.id(), entity.name())
    }
}

impl NamedEntity for CandidateSummary {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// How an id was arrived at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionSource {
    /// Input was already an id
    Id,
    /// Unique case-insensitive name match
    ExactName,
    /// Unique substring match
    PartialName,
    /// Configured default
    Default,
}

/// Outcome of a successful resolution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionResult {
    /// How the id was found
    pub source: ResolutionSource,
    /// Input as given
    pub raw_input: String,
    /// Resolved id
    pub resolved_id: String,
    /// Name of the resolved entity, when known
    pub resolved_name: Option<String>,
}

impl ResolutionResult {
    fn from_entity<E: NamedEntity>(source: ResolutionSource, raw_input: &str, entity: &E) -> Self {
        Self {
            source,
            raw_input: raw_input.to_string(),
            resolved_id: entity.id().to_string(),
            resolved_name: Some(entity.name().to_string()),
        }
    }
}

fn trimmed_target(input: &str) -> Result<&str> {
    let target = input.trim();
    if target.is_empty() {
        return Err(Error::InvalidArgument("name to resolve is empty".to_string()));
    }
    Ok(target)
}

/// Resolve a name against a flat candidate list
///
/// A unique case-insensitive exact match wins. Otherwise a unique substring
/// match wins. Several matches at either stage fail with `AmbiguousMatch`,
/// none at all with `NotFound`; both list at most [`MAX_CANDIDATES`].
pub fn resolve_by_name<E: NamedEntity>(candidates: &[E], input: &str) -> Result<ResolutionResult> {
    let target = trimmed_target(input)?;
    let needle = matching::normalize(target);

    let mut exact = Vec::new();
    let mut partial = Vec::new();
    for candidate in candidates {
        match matching::classify(candidate.name(), &needle) {
            Some(matching::MatchKind::Exact) => exact.push(candidate),
            Some(matching::MatchKind::Partial) => partial.push(candidate),
            None => {}
        }
    }

    let (entity, source) = matching::pick(target, &exact, &partial, || {
        (matching::summarize(candidates), candidates.len())
    })
    .inspect_err(|e| debug!(name = target, code = e.code(), "Name resolution failed"))?;

    debug!(name = target, id = entity.id(), ?source, "Name resolved");
    Ok(ResolutionResult::from_entity(source, input, entity))
}

/// Resolve an id or a name
///
/// Input equal to a candidate id short-circuits name matching.
pub fn resolve_identifier<E: NamedEntity>(
    candidates: &[E],
    input: &str,
) -> Result<ResolutionResult> {
    let target = trimmed_target(input)?;
    if let Some(entity) = candidates.iter().find(|c| c.id() == target) {
        return Ok(ResolutionResult::from_entity(
            ResolutionSource::Id,
            input,
            entity,
        ));
    }
    resolve_by_name(candidates, input)
}

/// Resolve a hub from an explicit id or name, else the configured default
pub fn resolve_hub<E: NamedEntity>(
    hubs: &[E],
    input: Option<&str>,
    default_hub: Option<&str>,
) -> Result<ResolutionResult> {
    if let Some(input) = input.filter(|i| !i.trim().is_empty()) {
        return resolve_identifier(hubs, input);
    }

    let Some(default_hub) = default_hub.map(str::trim).filter(|h| !h.is_empty()) else {
        return Err(Error::InvalidArgument(
            "no hub given and no default hub configured".to_string(),
        ));
    };

    let resolved_name = hubs
        .iter()
        .find(|h| h.id() == default_hub)
        .map(|h| h.name().to_string());
    debug!(hub = default_hub, "Using default hub");
    Ok(ResolutionResult {
        source: ResolutionSource::Default,
        raw_input: default_hub.to_string(),
        resolved_id: default_hub.to_string(),
        resolved_name,
    })
}
