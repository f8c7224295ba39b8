//! Folder resolution by bounded breadth-first search

use std::collections::{HashSet, VecDeque};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::matching::{self, MatchKind};
use super::{CandidateSummary, NamedEntity, ResolutionResult};
use crate::{Error, Result};

/// One folder in a project tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderNode {
    /// Folder id
    pub id: String,
    /// Display name
    pub name: String,
    /// Slash-separated path from the project root
    pub path: String,
    /// Parent folder, `None` for top folders
    pub parent_id: Option<String>,
}

impl FolderNode {
    /// Top-level folder
    pub fn top(id: impl Into<String>, name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            id: id.into(),
            path: name.clone(),
            name,
            parent_id: None,
        }
    }

    /// Child of this folder; path and parent are derived
    pub fn child(&self, id: impl Into<String>, name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            id: id.into(),
            path: format!("{}/{}", self.path, name),
            name,
            parent_id: Some(self.id.clone()),
        }
    }
}

impl NamedEntity for FolderNode {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Lists the sub-folders of a folder
#[async_trait]
pub trait FolderSource: Send + Sync {
    /// Direct children of `folder`
    async fn children(&self, folder: &FolderNode) -> Result<Vec<FolderNode>>;
}

/// A resolved folder with the search cost
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FolderResolution {
    /// Resolution outcome
    #[serde(flatten)]
    pub result: ResolutionResult,
    /// The matched folder
    pub folder: FolderNode,
    /// Folders examined
    pub scanned: usize,
}

fn normalize_path(path: &str) -> String {
    matching::normalize(path.trim_matches('/'))
}

fn classify_folder(node: &FolderNode, needle: &str, by_path: bool) -> Option<MatchKind> {
    if by_path {
        let path = normalize_path(&node.path);
        if path == needle {
            return Some(MatchKind::Exact);
        }
        if path.contains(needle) {
            return Some(MatchKind::Partial);
        }
    }
    matching::classify(&node.name, needle)
}

/// Find a folder by name under `top_nodes`
///
/// Breadth-first, skipping ids already seen, examining at most `max_scan`
/// folders. A target containing `/` is also compared against full paths.
/// Exact matches take precedence over partial ones with the usual
/// uniqueness rule. Uniqueness needs a full scan: when the budget runs out
/// only two or more exact matches decide (as ambiguous); anything else fails
/// with `ScanLimitExceeded`.
pub async fn resolve_folder_by_name<S>(
    source: &S,
    top_nodes: Vec<FolderNode>,
    input: &str,
    max_scan: usize,
) -> Result<FolderResolution>
where
    S: FolderSource + ?Sized,
{
    let target = input.trim();
    if target.is_empty() {
        return Err(Error::InvalidArgument("folder name is empty".to_string()));
    }
    let by_path = target.contains('/');
    let needle = if by_path {
        normalize_path(target)
    } else {
        matching::normalize(target)
    };

    let mut queue: VecDeque<FolderNode> = top_nodes.into();
    let mut visited: HashSet<String> = HashSet::new();
    let mut exact: Vec<FolderNode> = Vec::new();
    let mut partial: Vec<FolderNode> = Vec::new();
    let mut sample: Vec<CandidateSummary> = Vec::new();
    let mut scanned = 0usize;

    let limit_hit = loop {
        let Some(node) = queue.pop_front() else {
            break false;
        };
        if visited.contains(&node.id) {
            continue;
        }
        if scanned >= max_scan {
            break true;
        }
        visited.insert(node.id.clone());
        scanned += 1;
        if sample.len() < matching::MAX_CANDIDATES {
            sample.push(CandidateSummary::from_entity(&node));
        }

        match classify_folder(&node, &needle, by_path) {
            Some(MatchKind::Exact) => exact.push(node.clone()),
            Some(MatchKind::Partial) => partial.push(node.clone()),
            None => {}
        }

        // Children of the last budgeted folder would never be examined
        if scanned == max_scan {
            break true;
        }
        let children = source.children(&node).await?;
        queue.extend(children.into_iter().filter(|c| !visited.contains(&c.id)));
    };

    // Two exact matches are ambiguous however much is left unscanned
    if limit_hit && exact.len() < 2 {
        warn!(
            name = target,
            scanned,
            exact = exact.len(),
            partial = partial.len(),
            "Folder search hit its scan limit"
        );
        return Err(Error::ScanLimitExceeded {
            target: target.to_string(),
            scanned,
        });
    }

    let exact_refs: Vec<&FolderNode> = exact.iter().collect();
    let partial_refs: Vec<&FolderNode> = if limit_hit {
        Vec::new()
    } else {
        partial.iter().collect()
    };

    let (folder, source_kind) = matching::pick(target, &exact_refs, &partial_refs, || {
        (sample, scanned)
    })
    .inspect_err(|e| debug!(name = target, scanned, code = e.code(), "Folder resolution failed"))?;

    debug!(name = target, id = %folder.id, path = %folder.path, scanned, "Folder resolved");
    Ok(FolderResolution {
        result: ResolutionResult::from_entity(source_kind, input, folder),
        folder: folder.clone(),
        scanned,
    })
}
