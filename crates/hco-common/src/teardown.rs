//! Teardown of operands the operator no longer wants
//!
//! Removal is gated on ownership: only objects whose `app` label names the
//! requesting parent are touched. Every step treats "already gone" as
//! success, so calling [`remove_component`] repeatedly is safe.
//!
//! With `wait` set the delete is issued with foreground propagation and the
//! call blocks, polling the store, until the object is gone or the
//! [`WaitContext`] expires or is cancelled.

use std::time::Duration;

use kube::api::{DeleteParams, PropagationPolicy};
use kube::Resource;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use crate::store::ObjectStore;
use crate::{Error, Result, APP_LABEL};

/// Interval between existence checks while waiting for a deletion
pub const DELETION_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Bound on a blocking teardown wait
#[derive(Clone, Debug)]
pub struct WaitContext {
    /// Give up after this long
    pub timeout: Duration,
    /// Give up as soon as this is cancelled
    pub cancel: CancellationToken,
}

impl WaitContext {
    /// Context bounded only by `timeout`
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            cancel: CancellationToken::new(),
        }
    }

    /// Context bounded by `timeout` and an external cancellation token
    pub fn with_cancel(timeout: Duration, cancel: CancellationToken) -> Self {
        Self { timeout, cancel }
    }
}

/// How a removal is carried out
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RemoveOptions {
    /// Ask the server to validate the delete without persisting it
    pub dry_run: bool,
    /// Cascade to dependents first and block until the object is gone
    pub wait: bool,
}

/// Delete parameters for the given options
pub fn deletion_params(opts: RemoveOptions) -> DeleteParams {
    let mut params = DeleteParams {
        dry_run: opts.dry_run,
        ..Default::default()
    };
    if opts.wait {
        params.propagation_policy = Some(PropagationPolicy::Foreground);
    }
    params
}

fn owned_by<K: Resource>(obj: &K, owner: &str) -> bool {
    obj.meta()
        .labels
        .as_ref()
        .and_then(|l| l.get(APP_LABEL))
        .is_some_and(|v| v == owner)
}

/// Remove the named object if `owner` owns it
///
/// Returns `true` only when a real (non dry-run) delete was issued and, with
/// `wait`, confirmed. Store errors on the initial fetch propagate.
pub async fn remove_component<K>(
    store: &dyn ObjectStore<K>,
    name: &str,
    namespace: &str,
    owner: &str,
    opts: RemoveOptions,
    ctx: &WaitContext,
) -> Result<bool>
where
    K: Resource<DynamicType = ()> + Send + Sync + 'static,
{
    match store.get(name, namespace).await? {
        Some(obj) => remove_object(store, &obj, owner, opts, ctx).await,
        None => {
            trace!(kind = %K::kind(&()), name, namespace, "already absent");
            Ok(false)
        }
    }
}

/// Fetch-then-remove, treating a missing object or kind as already removed
pub async fn ensure_deleted<K>(
    store: &dyn ObjectStore<K>,
    name: &str,
    namespace: &str,
    owner: &str,
    opts: RemoveOptions,
    ctx: &WaitContext,
) -> Result<bool>
where
    K: Resource<DynamicType = ()> + Send + Sync + 'static,
{
    let obj = match store.get(name, namespace).await {
        Ok(Some(obj)) => obj,
        Ok(None) => return Ok(false),
        Err(e) if e.is_not_found() => {
            debug!(kind = %K::kind(&()), name, namespace, "kind not served, nothing to delete");
            return Ok(false);
        }
        Err(e) => return Err(e),
    };
    remove_object(store, &obj, owner, opts, ctx).await
}

async fn remove_object<K>(
    store: &dyn ObjectStore<K>,
    obj: &K,
    owner: &str,
    opts: RemoveOptions,
    ctx: &WaitContext,
) -> Result<bool>
where
    K: Resource<DynamicType = ()> + Send + Sync + 'static,
{
    let kind = K::kind(&());
    let name = obj.meta().name.clone().unwrap_or_default();
    let namespace = obj.meta().namespace.clone().unwrap_or_default();

    if !owned_by(obj, owner) {
        debug!(%kind, %name, %namespace, owner, "not owned by this parent, leaving in place");
        return Ok(false);
    }

    info!(%kind, %name, %namespace, dry_run = opts.dry_run, wait = opts.wait, "removing component");
    if !store.delete(&name, &namespace, &deletion_params(opts)).await? {
        debug!(%kind, %name, %namespace, "deleted concurrently");
        return Ok(false);
    }

    if opts.dry_run {
        return Ok(false);
    }
    if opts.wait {
        wait_for_deletion(store, &name, &namespace, ctx).await?;
    }
    Ok(true)
}

/// Block until `get` reports the object gone
///
/// Transient fetch errors are ignored; only cancellation or the timeout end
/// the wait early, both as [`Error::Timeout`].
pub async fn wait_for_deletion<K>(
    store: &dyn ObjectStore<K>,
    name: &str,
    namespace: &str,
    ctx: &WaitContext,
) -> Result<()>
where
    K: Resource<DynamicType = ()> + Send + Sync + 'static,
{
    let kind = K::kind(&());
    let deadline = Instant::now() + ctx.timeout;

    let poll = async {
        loop {
            tokio::time::sleep(DELETION_POLL_INTERVAL).await;
            match store.get(name, namespace).await {
                Ok(None) => {
                    debug!(%kind, name, namespace, "deletion confirmed");
                    return;
                }
                Err(e) if e.is_not_found() => return,
                Ok(Some(_)) => {}
                Err(e) => trace!(%kind, name, error = %e, "poll failed, retrying"),
            }
        }
    };

    // an in-flight fetch is abandoned on cancel or deadline
    tokio::select! {
        biased;
        _ = ctx.cancel.cancelled() => Err(Error::timeout(&*kind, name, "wait cancelled")),
        _ = tokio::time::sleep_until(deadline) => Err(Error::timeout(
            &*kind,
            name,
            format!("still present after {:?}", ctx.timeout),
        )),
        () = poll => Ok(()),
    }
}
