//! List-query resolution shared by every list page.
//!
//! A request flows through four stages, each taking its inputs explicitly:
//!
//! 1. [`params::normalize`] splits the page number off the raw parameters.
//! 2. [`filter::build_filter`] turns recognised keys into predicates.
//! 3. [`scope::apply_role_scope`] restricts the filter to what the caller may see.
//! 4. [`fetch::fetch_page`] counts and loads one page in a single read transaction.

pub mod fetch;
pub mod filter;
pub mod params;
pub mod predicate;
pub mod rows;
pub mod schema;
pub mod scope;

use fetch::{PageDescriptor, ResultSet};
use params::QueryParams;
use rusqlite::Connection;
use schema::Entity;
use scope::Caller;

#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("database query failed: {0}")]
    Db(#[from] rusqlite::Error),
}

/// Outcome of one list request.
#[derive(Debug, Clone, PartialEq)]
pub struct Listing {
    pub page: PageDescriptor,
    pub result: ResultSet,
}

pub fn resolve_list(
    conn: &Connection,
    entity: Entity,
    caller: &Caller,
    raw: &QueryParams,
    page_size: u32,
) -> Result<Listing, QueryError> {
    let (page, rest) = params::normalize(raw);
    let filter = scope::apply_role_scope(filter::build_filter(entity, &rest), caller);
    let page = PageDescriptor::new(page, page_size);
    let result = fetch::fetch_page(conn, &filter, page)?;
    tracing::debug!(
        ?entity,
        role = caller.role.map(|r| r.as_str()).unwrap_or("-"),
        page = page.page(),
        filters = filter.slot_count(),
        count = result.count,
        "list resolved"
    );
    Ok(Listing { page, result })
}
