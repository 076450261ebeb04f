//! Post-generation side of the cache: tags eligible responses and persists
//! fresh ones.

use tracing::{debug, warn};

use super::compression;
use super::context::CacheContext;
use super::error::CacheResult;
use super::record::CacheRecord;
use super::ResponseCache;
use crate::http::{Body, Request, Response, StatusCode};

/// Response headers kept in a stored record. Everything else stays on the
/// live response only.
pub const CACHEABLE_HEADERS: &[&str] = &[
    "Location",
    "Content-Type",
    "ETag",
    "Content-Encoding",
    "Last-Modified",
    "Cache-Control",
    "Expires",
    "Link",
    "Surrogate-Keys",
    "Cache-Tags",
];

/// Statuses that receive `ETag` and `X-Alternate-Cache-Key`.
const TAGGED_STATUSES: &[StatusCode] = &[
    StatusCode::Ok,
    StatusCode::NotFound,
    StatusCode::MovedPermanently,
    StatusCode::NotModified,
];

/// Statuses written to the store after a miss.
const STORED_STATUSES: &[StatusCode] = &[
    StatusCode::Ok,
    StatusCode::NotFound,
    StatusCode::MovedPermanently,
];

/// Request traits the capture pipeline cares about.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestHints {
    /// Internet Explorer issuing an XHR/JSON request; such responses get
    /// `Expires: -1` so the browser does not reuse them.
    pub ie_ajax: bool,
}

impl RequestHints {
    pub fn from_request(request: &Request) -> Self {
        Self {
            ie_ajax: is_ie_ajax(request),
        }
    }
}

fn is_ie_ajax(request: &Request) -> bool {
    let headers = request.headers();
    let Some(agent) = headers.get("user-agent").filter(|a| !a.is_empty()) else {
        return false;
    };
    let xhr = headers
        .get("x-requested-with")
        .is_some_and(|v| v.eq_ignore_ascii_case("XMLHttpRequest"));
    let json = headers.get("accept") == Some("application/json");
    (xhr || json) && is_internet_explorer(agent)
}

fn is_internet_explorer(agent: &str) -> bool {
    (agent.contains("MSIE ") || agent.contains("Trident/")) && !agent.contains("Opera")
}

impl ResponseCache {
    /// Decorates a response produced for a cached request and, on a miss,
    /// writes it to the store under the unversioned key.
    ///
    /// Requests that never reached the handler (`context.cache == false`)
    /// pass through untouched. Store write failures are logged and dropped.
    pub fn capture(
        &self,
        context: &CacheContext,
        hints: RequestHints,
        response: Response,
    ) -> CacheResult<Response> {
        if !context.cache {
            return Ok(response);
        }

        let (status, mut headers, mut body) = response.into_parts();
        let tagged = TAGGED_STATUSES.contains(&status);

        if tagged {
            if let Some(key) = &context.key {
                headers.set("ETag", key.as_str());
            }
            if let Some(key) = &context.unversioned_key {
                headers.set("X-Alternate-Cache-Key", key.as_str());
            }
        }

        if context.miss && STORED_STATUSES.contains(&status) {
            let plain = body.into_bytes();
            let compressed = compression::gzip(&plain)?;

            let record = CacheRecord {
                status,
                headers: headers.select(CACHEABLE_HEADERS),
                body: compressed,
                created_at: Some(self.clock.now()),
                location: if status == StatusCode::MovedPermanently {
                    headers.get("location").map(str::to_owned)
                } else {
                    None
                },
            };

            if let Some(key) = &context.unversioned_key {
                match self
                    .store
                    .write(key, record.encode(), context.versioned_cache_expiry)
                {
                    Ok(()) => debug!(key = %key, status = status.as_u16(), "Stored response"),
                    Err(err) => warn!(key = %key, error = %err, "Backing store write failed"),
                }
            }

            // Reuse the compressed bytes rather than compressing twice.
            body = if context.accepts_gzip {
                headers.set("Content-Encoding", "gzip");
                Body::from(record.body)
            } else {
                Body::from(plain)
            };
        }

        if tagged && hints.ie_ajax {
            headers.set("Expires", "-1");
        }
        headers.set("X-Cache", context.x_cache());

        Ok(Response::from_parts(status, headers, body))
    }
}
