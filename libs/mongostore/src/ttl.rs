//! Expiry index management.

use std::time::Duration;

use tracing::info;

use crate::backend::{DocumentBackend, IndexSpec};
use crate::context::Context;
use crate::error::{Phase, SessionResult};

/// Make sure the backend expires documents `expire_after` past `ttl_field`.
///
/// Does nothing if any index already covers the field, so calling it on
/// every store construction never creates duplicates. Returns whether an
/// index was created.
pub async fn ensure_expiry_index<B>(
    ctx: &Context,
    backend: &B,
    ttl_field: &str,
    expire_after: Duration,
) -> SessionResult<bool>
where
    B: DocumentBackend + ?Sized,
{
    let indexes = ctx.run(Phase::ListIndexes, backend.list_indexes()).await?;

    if let Some(existing) = indexes.iter().find(|index| index.covers(ttl_field)) {
        info!(
            "Expiry index on {} already present: {}",
            ttl_field,
            existing.name.as_deref().unwrap_or("<unnamed>")
        );
        return Ok(false);
    }

    ctx.run(
        Phase::CreateIndex,
        backend.create_index(IndexSpec::expiring(ttl_field, expire_after)),
    )
    .await?;

    info!(
        "Created expiry index on {} ({} seconds)",
        ttl_field,
        expire_after.as_secs()
    );
    Ok(true)
}
