//! Listing and resolution tests
//!
//! Pages a mock API through the executor, then resolves names against the
//! aggregated result and walks a folder tree served over HTTP.

use async_trait::async_trait;
use construction_mcp::config::AccessConfig;
use construction_mcp::executor::{RequestExecutor, RequestOptions};
use construction_mcp::pagination::{
    PageOptions, PageRequest, PageResult, Pagination, fetch_all_pages,
};
use construction_mcp::resolver::{
    CandidateSummary, FolderNode, FolderSource, ResolutionSource, resolve_by_name,
    resolve_folder_by_name,
};
use construction_mcp::{Error, Result};
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const NAMES: [&str; 23] = [
    "Site A",
    "Site A Annex",
    "Tower 1 West",
    "Tower 1 East",
    "Depot",
    "Harbour Bridge",
    "Station North",
    "Station South",
    "Library",
    "Hospital Wing B",
    "School Gym",
    "Parking Deck",
    "Water Plant",
    "Substation 7",
    "Rail Yard",
    "Ferry Terminal",
    "Civic Hall",
    "Stadium",
    "Museum Annex",
    "Depot North",
    "Airport Hangar",
    "Lab Block",
    "Data Center",
];

fn project(i: usize) -> Value {
    json!({"id": format!("p{i}"), "attributes": {"name": NAMES[i]}})
}

async fn mount_projects(api: &MockServer, page_size: usize) {
    for offset in (0..NAMES.len()).step_by(page_size) {
        let end = (offset + page_size).min(NAMES.len());
        let data: Vec<Value> = (offset..end).map(project).collect();
        Mock::given(method("GET"))
            .and(path("/projects"))
            .and(query_param("offset", offset.to_string()))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": data,
                "meta": {"totalResults": NAMES.len()}
            })))
            .mount(api)
            .await;
    }
}

fn fast_executor() -> RequestExecutor {
    let mut config = AccessConfig::default();
    config.retry.base_delay_ms = 10;
    RequestExecutor::new(&config).unwrap()
}

/// One page of projects through the executor
async fn fetch_projects(
    exec: &RequestExecutor,
    base: &str,
    req: PageRequest,
) -> Result<PageResult<CandidateSummary>> {
    let body = exec
        .get_json(&format!(
            "{base}/projects?limit={}&offset={}",
            req.limit, req.offset
        ))
        .await?;

    let Some(data) = body.get("data").and_then(Value::as_array) else {
        return Ok(PageResult::new(Vec::new()).with_schema_warning("response has no data array"));
    };
    let items = data
        .iter()
        .filter_map(|p| {
            Some(CandidateSummary::new(
                p.get("id")?.as_str()?,
                p.pointer("/attributes/name")?.as_str()?,
            ))
        })
        .collect();
    let total = body
        .pointer("/meta/totalResults")
        .and_then(Value::as_u64)
        .and_then(|t| usize::try_from(t).ok());

    Ok(PageResult::new(items).with_pagination(Pagination {
        limit: req.limit,
        offset: req.offset,
        total_results: total,
        ..Pagination::default()
    }))
}

/// Aggregates every page, then resolves names against the full listing
#[tokio::test]
async fn test_aggregate_then_resolve() {
    let api = MockServer::start().await;
    mount_projects(&api, 10).await;
    let exec = fast_executor();
    let base = api.uri();

    let options = PageOptions {
        fetch_all: true,
        limit: 10,
        offset: 0,
        max_pages: 10,
        max_items: 100,
    };
    let listing = fetch_all_pages(&options, |req| fetch_projects(&exec, &base, req))
        .await
        .unwrap();

    assert_eq!(listing.items.len(), NAMES.len());
    let pagination = listing.pagination.unwrap();
    assert!(!pagination.has_more);
    assert_eq!(pagination.next_offset, None);
    assert_eq!(pagination.fetched_pages, 3);
    assert_eq!(pagination.total_results, Some(NAMES.len()));

    let site = resolve_by_name(&listing.items, "Site A").unwrap();
    assert_eq!(site.resolved_id, "p0");
    assert_eq!(site.source, ResolutionSource::ExactName);

    match resolve_by_name(&listing.items, "Tower 1 ") {
        Err(Error::AmbiguousMatch { candidates, .. }) => {
            let names: Vec<&str> = candidates.iter().map(|c| c.name.as_str()).collect();
            assert_eq!(names, vec!["Tower 1 West", "Tower 1 East"]);
        }
        other => panic!("expected ambiguity, got {other:?}"),
    }
}

/// The item ceiling stops the loop and reports where to resume
#[tokio::test]
async fn test_item_ceiling_reports_resume_point() {
    let api = MockServer::start().await;
    mount_projects(&api, 5).await;
    let exec = fast_executor();
    let base = api.uri();

    let options = PageOptions {
        fetch_all: true,
        limit: 5,
        offset: 0,
        max_pages: 10,
        max_items: 12,
    };
    let listing = fetch_all_pages(&options, |req| fetch_projects(&exec, &base, req))
        .await
        .unwrap();

    assert_eq!(listing.items.len(), 12);
    let pagination = listing.pagination.unwrap();
    assert!(pagination.has_more);
    assert_eq!(pagination.next_offset, Some(12));
}

/// Folder tree served over HTTP: `/folders/{id}/children`
struct ApiFolders<'a> {
    exec: &'a RequestExecutor,
    base: String,
}

#[async_trait]
impl FolderSource for ApiFolders<'_> {
    async fn children(&self, folder: &FolderNode) -> Result<Vec<FolderNode>> {
        let body = self
            .exec
            .execute(
                &format!("{}/folders/{}/children", self.base, folder.id),
                RequestOptions::get(),
            )
            .await?
            .into_json();
        Ok(body
            .get("data")
            .and_then(Value::as_array)
            .map(|children| {
                children
                    .iter()
                    .filter_map(|c| {
                        Some(folder.child(c.get("id")?.as_str()?, c.get("name")?.as_str()?))
                    })
                    .collect()
            })
            .unwrap_or_default())
    }
}

async fn mount_children(api: &MockServer, parent: &str, children: Value) {
    Mock::given(method("GET"))
        .and(path(format!("/folders/{parent}/children")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": children })))
        .mount(api)
        .await;
}

/// Breadth-first folder search over the API, within and beyond its budget
#[tokio::test]
async fn test_folder_search_over_api() {
    let api = MockServer::start().await;
    mount_children(&api, "root", json!([{"id": "f1", "name": "Plans"}, {"id": "f2", "name": "Specs"}])).await;
    mount_children(&api, "f1", json!([{"id": "f3", "name": "Level 1"}])).await;
    mount_children(&api, "f2", json!([])).await;
    mount_children(&api, "f3", json!([{"id": "f4", "name": "RFIs"}])).await;
    mount_children(&api, "f4", json!([])).await;

    let exec = fast_executor();
    let folders = ApiFolders {
        exec: &exec,
        base: api.uri(),
    };
    let top = vec![FolderNode::top("root", "Project Files")];

    let found = resolve_folder_by_name(&folders, top.clone(), "rfis", 50)
        .await
        .unwrap();
    assert_eq!(found.folder.id, "f4");
    assert_eq!(found.folder.path, "Project Files/Plans/Level 1/RFIs");
    assert_eq!(found.folder.parent_id.as_deref(), Some("f3"));

    let err = resolve_folder_by_name(&folders, top, "rfis", 2)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ScanLimitExceeded { scanned: 2, .. }));
}

/// Listing failures propagate out of the aggregator
#[tokio::test]
async fn test_page_failure_propagates() {
    let api = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(403).set_body_string("forbidden"))
        .mount(&api)
        .await;
    let exec = fast_executor();
    let base = api.uri();

    let err = fetch_all_pages(&PageOptions::default(), |req| fetch_projects(&exec, &base, req))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Http { status: 403, .. }));
}
