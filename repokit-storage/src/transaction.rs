//! Scoped transactions.

use std::future::Future;
use std::sync::Arc;

use repokit_core::{Ctx, RepoResult};
use tracing::{debug, warn};

use crate::store::Store;

/// Run `f` inside a transaction on `store`.
///
/// `f` receives a context carrying the transaction; every repository call
/// made with it joins the transaction. The transaction commits when `f`
/// returns `Ok` and rolls back when it returns `Err`. If `f` panics or its
/// future is dropped, the transaction handle is dropped unfinished and the
/// store discards it.
///
/// When `ctx` already carries a transaction of `store`, `f` joins it and the
/// outer owner decides the outcome.
pub async fn with_transaction<T, F, Fut>(store: &dyn Store, ctx: &Ctx, f: F) -> RepoResult<T>
where
    F: FnOnce(Ctx) -> Fut,
    Fut: Future<Output = RepoResult<T>>,
{
    if let Some(tx) = ctx.tx() {
        if store.owns(tx) {
            debug!("joining enclosing transaction");
            return f(ctx.clone()).await;
        }
    }

    ctx.check()?;
    let tx = store.begin(ctx).await?;
    let tx_ctx = ctx.with_tx(Arc::clone(&tx));
    match f(tx_ctx).await {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = tx.rollback().await {
                warn!(error = %rollback_err, "transaction rollback failed");
            }
            Err(err)
        }
    }
}
