//! Paginated file listing
//!
//! Two ways into a page: a directory prefix (first page) or a continuation
//! token from a previous page. The token already pins the prefix, so the two
//! are never combined.

use crate::error::Result;
use crate::schemas::{FileMetadata, ListingPage, ListingQuery};
use crate::storage::{ListRequest, ObjectStore};

/// Fetch one page of file metadata
pub async fn list_files(store: &dyn ObjectStore, query: &ListingQuery) -> Result<ListingPage> {
    query.check_exclusive()?;

    let request = match &query.page_token {
        Some(token) => ListRequest {
            prefix: String::new(),
            continuation_token: Some(token.clone()),
            max_keys: query.page_size,
        },
        None => ListRequest {
            prefix: query.directory.clone(),
            continuation_token: None,
            max_keys: query.page_size,
        },
    };

    let page = store.list_page(request).await?;

    let mut files: Vec<FileMetadata> = page
        .objects
        .into_iter()
        .map(|object| FileMetadata {
            file_path: object.key,
            last_modified: object.last_modified,
            size_bytes: object.size,
        })
        .collect();

    // Stores return key order already; keep the guarantee local
    files.sort_by(|a, b| a.file_path.cmp(&b.file_path));
    files.truncate(query.page_size);

    Ok(ListingPage {
        files,
        next_page_token: page.next_continuation_token.filter(|token| !token.is_empty()),
    })
}
