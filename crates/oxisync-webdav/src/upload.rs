//! In-flight upload state
//!
//! Three shapes, picked at `begin_upload`:
//!
//! - `Buffered`: small full uploads are assembled in memory and sent as one
//!   `PUT` on commit.
//! - `Chunked`: large full uploads go to a temporary collection under
//!   `/dav/uploads/{user}/{id}` and are assembled with a `MOVE` of `.file`.
//! - `Patch`: delta uploads keep the changed ranges and apply them with
//!   partial-update `PATCH` requests on commit.
//!
//! In every shape the destination is untouched until commit.

/// Content type of a SabreDAV partial update
pub(crate) const PARTIAL_UPDATE_CONTENT_TYPE: &str = "application/x-sabredav-partialupdate";

#[derive(Debug)]
pub(crate) enum PendingUpload {
    Buffered { data: Vec<u8> },
    Chunked { collection_url: String },
    Patch { ranges: Vec<(u64, Vec<u8>)> },
}

impl PendingUpload {
    pub(crate) fn buffered(total_size: u64) -> Self {
        Self::Buffered {
            data: Vec::with_capacity(usize::try_from(total_size).unwrap_or(0)),
        }
    }
}

/// Copies `chunk` into `buf` at `offset`, growing it as needed.
pub(crate) fn write_at(buf: &mut Vec<u8>, offset: u64, chunk: &[u8]) {
    let start = offset as usize;
    let end = start + chunk.len();
    if buf.len() < end {
        buf.resize(end, 0);
    }
    buf[start..end].copy_from_slice(chunk);
}

/// Value of the `X-Update-Range` header for a patch at `offset`
pub(crate) fn update_range(offset: u64, len: usize) -> String {
    let last = offset + (len as u64).saturating_sub(1);
    format!("bytes={offset}-{last}")
}

/// Name of a chunk inside the upload collection; sorts by offset
pub(crate) fn chunk_name(offset: u64) -> String {
    format!("{offset:020}")
}

/// `If-Match` header value for a stored (unquoted) ETag
pub(crate) fn quoted(etag: &str) -> String {
    format!("\"{etag}\"")
}
