//! Shared headroom pool size.

use crate::client::ConfigDbClient;
use crate::error::QosResult;
use crate::tables::{self, buffer_pool_fields};
use tracing::debug;

/// Returns the `xoff` size of the ingress lossless pool.
///
/// `None` means shared headroom is not enabled on this ASIC.
pub async fn resolve_shared_headroom(client: &ConfigDbClient) -> QosResult<Option<String>> {
    let scheme = client.buffer_scheme().await?;
    let key = scheme.pool_key(tables::INGRESS_LOSSLESS_POOL);
    let mut pool = client.hgetall(scheme.db, &key).await?;
    let xoff = pool.remove(buffer_pool_fields::XOFF);
    debug!(asic = %client.label(), ?xoff, "Shared headroom pool size");
    Ok(xoff)
}
