//! HyperConverged controller
//!
//! One pass per parent event:
//! 1. On deletion, tear the SSP down (waiting for it to be gone) and drop the finalizer.
//! 2. Make sure the finalizer is present.
//! 3. Pin the data import schedule, generating one the first time.
//! 4. Reconcile the SSP operand.
//! 5. Record conditions, version and observed generation on the parent status.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hco_common::crd::{
    Condition, ConditionStatus, HyperConverged, HyperConvergedStatus, Ssp, HCO_VERSION_NAME,
};
use hco_common::store::{KubeStore, ObjectStore};
use hco_common::teardown::{ensure_deleted, RemoveOptions, WaitContext};
use hco_common::{Error, Result, APP_LABEL, FIELD_MANAGER};
use hco_operands::ssp::SSP_NAME_PREFIX;
use hco_operands::templates::random_schedule;
use hco_operands::{HcoRequest, OperandHandler, SspHooks, TemplateRegistry};
use kube::api::{Api, Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::runtime::reflector::ObjectRef;
use kube::{Client, ResourceExt};
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};

use crate::config::OperatorConfig;

/// Finalizer guarding operand teardown
pub const HCO_FINALIZER: &str = "kubevirt.io/hyperconverged";

/// Condition reporting the outcome of the last pass
pub const CONDITION_RECONCILE_COMPLETE: &str = "ReconcileComplete";

/// Requeue interval after a successful pass
pub const REQUEUE_INTERVAL: Duration = Duration::from_secs(300);

/// Requeue interval while an operand is still rolling out a new version
pub const UPGRADE_REQUEUE_INTERVAL: Duration = Duration::from_secs(10);

// =============================================================================
// Parent client
// =============================================================================

/// Writes to the `HyperConverged` object itself
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HcoStatusClient: Send + Sync {
    /// Merge-patch the status subresource
    async fn patch_status(
        &self,
        name: &str,
        namespace: &str,
        status: &HyperConvergedStatus,
    ) -> Result<()>;

    /// Add a finalizer if not already present
    async fn add_finalizer(&self, name: &str, namespace: &str, finalizer: &str) -> Result<()>;

    /// Remove a finalizer
    async fn remove_finalizer(&self, name: &str, namespace: &str, finalizer: &str) -> Result<()>;
}

/// [`HcoStatusClient`] backed by the API server
pub struct KubeHcoStatusClient {
    client: Client,
}

impl KubeHcoStatusClient {
    /// Wrap a kube client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> Api<HyperConverged> {
        Api::namespaced(self.client.clone(), namespace)
    }

    async fn patch_finalizers(
        &self,
        name: &str,
        namespace: &str,
        finalizers: Vec<String>,
    ) -> Result<()> {
        let patch = serde_json::json!({
            "metadata": {
                "finalizers": finalizers
            }
        });
        self.api(namespace)
            .patch(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl HcoStatusClient for KubeHcoStatusClient {
    async fn patch_status(
        &self,
        name: &str,
        namespace: &str,
        status: &HyperConvergedStatus,
    ) -> Result<()> {
        let patch = serde_json::json!({ "status": status });
        self.api(namespace)
            .patch_status(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn add_finalizer(&self, name: &str, namespace: &str, finalizer: &str) -> Result<()> {
        let hco = self.api(namespace).get(name).await?;
        let mut finalizers = hco.metadata.finalizers.unwrap_or_default();
        if finalizers.iter().any(|f| f == finalizer) {
            return Ok(());
        }
        finalizers.push(finalizer.to_string());
        self.patch_finalizers(name, namespace, finalizers).await
    }

    async fn remove_finalizer(&self, name: &str, namespace: &str, finalizer: &str) -> Result<()> {
        let hco = self.api(namespace).get(name).await?;
        let finalizers: Vec<String> = hco
            .metadata
            .finalizers
            .unwrap_or_default()
            .into_iter()
            .filter(|f| f != finalizer)
            .collect();
        self.patch_finalizers(name, namespace, finalizers).await
    }
}

// =============================================================================
// Context
// =============================================================================

/// Shared state of the controller
pub struct Context {
    /// SSP operand handler; one pass at a time
    pub ssp: Mutex<OperandHandler<SspHooks>>,
    /// Store the SSP handler writes through, also used for teardown
    pub ssp_store: Arc<dyn ObjectStore<Ssp>>,
    /// Default data import cron templates
    pub registry: Arc<TemplateRegistry>,
    /// Writes to the parent object
    pub client: Arc<dyn HcoStatusClient>,
    /// Version marker of the running operator
    pub version: String,
    /// Bound on waiting for the SSP to disappear on parent deletion
    pub teardown_timeout: Duration,
}

impl Context {
    /// Context over explicit collaborators
    pub fn new(
        ssp_store: Arc<dyn ObjectStore<Ssp>>,
        registry: Arc<TemplateRegistry>,
        client: Arc<dyn HcoStatusClient>,
        version: impl Into<String>,
        teardown_timeout: Duration,
    ) -> Self {
        let hooks = SspHooks::new(registry.clone(), None);
        Self {
            ssp: Mutex::new(OperandHandler::new(hooks, ssp_store.clone())),
            ssp_store,
            registry,
            client,
            version: version.into(),
            teardown_timeout,
        }
    }

    /// Context talking to the API server
    pub fn from_client(
        client: Client,
        registry: Arc<TemplateRegistry>,
        cfg: &OperatorConfig,
    ) -> Self {
        Self::new(
            Arc::new(KubeStore::new(client.clone())),
            registry,
            Arc::new(KubeHcoStatusClient::new(client)),
            cfg.version.clone(),
            cfg.teardown_timeout(),
        )
    }
}

// =============================================================================
// Reconcile
// =============================================================================

fn has_finalizer(hco: &HyperConverged) -> bool {
    hco.finalizers().iter().any(|f| f == HCO_FINALIZER)
}

/// Parent of an SSP event, named by the operand's owner label
pub fn parent_of_operand(ssp: &Ssp) -> Option<ObjectRef<HyperConverged>> {
    let parent = ssp.labels().get(APP_LABEL)?;
    let namespace = ssp.namespace()?;
    Some(ObjectRef::new(parent).within(&namespace))
}

/// Reconcile a `HyperConverged`
#[instrument(skip(hco, ctx), fields(hco = %hco.name_any()))]
pub async fn reconcile(hco: Arc<HyperConverged>, ctx: Arc<Context>) -> Result<Action> {
    let name = hco.name_any();
    let namespace = hco
        .namespace()
        .ok_or_else(|| Error::validation_for_field(&name, "metadata.namespace", "must be set"))?;

    if hco.is_being_deleted() {
        return teardown(&hco, &name, &namespace, &ctx).await;
    }

    if !has_finalizer(&hco) {
        info!("adding finalizer");
        ctx.client
            .add_finalizer(&name, &namespace, HCO_FINALIZER)
            .await?;
        return Ok(Action::requeue(Duration::from_secs(1)));
    }

    let mut instance = (*hco).clone();
    let (hco_triggered, upgrade_mode) = {
        let status = instance.status.get_or_insert_with(Default::default);
        let hco_triggered = instance.metadata.generation != status.observed_generation;
        // no recorded version means a fresh install, not an upgrade
        let upgrade_mode = status
            .version(HCO_VERSION_NAME)
            .is_some_and(|v| v != ctx.version);
        if status.data_import_schedule.as_deref().unwrap_or_default().is_empty() {
            let schedule = random_schedule();
            info!(%schedule, "generated data import schedule");
            status.data_import_schedule = Some(schedule);
        }
        (hco_triggered, upgrade_mode)
    };
    ctx.registry.pin_schedule(instance.data_import_schedule());

    let mut req = HcoRequest::new(instance, ctx.version.as_str())
        .with_hco_triggered(hco_triggered)
        .with_upgrade_mode(upgrade_mode);

    let outcome = {
        let mut handler = ctx.ssp.lock().await;
        handler.reset();
        handler.ensure(&mut req).await
    };

    let generation = req.instance.metadata.generation;
    let status = req.instance.status.get_or_insert_with(Default::default);
    match outcome {
        Ok(result) => {
            debug!(
                created = result.is_created(),
                updated = result.is_updated(),
                overwritten = result.is_overwritten(),
                upgrade_done = result.is_upgrade_done(),
                "SSP reconciled"
            );
            status.set_condition(Condition::new(
                CONDITION_RECONCILE_COMPLETE,
                ConditionStatus::True,
                "ReconcileCompleted",
                "Reconcile completed successfully",
            ));
            let upgrade_pending = req.upgrade_mode && !result.is_upgrade_done();
            if !upgrade_pending {
                if req.upgrade_mode {
                    info!(version = %req.version, "upgrade completed");
                }
                status.set_version(HCO_VERSION_NAME, &req.version);
            }
            status.observed_generation = generation;

            if hco.status.as_ref() != Some(&*status) {
                ctx.client.patch_status(&name, &namespace, status).await?;
            }
            if upgrade_pending {
                return Ok(Action::requeue(UPGRADE_REQUEUE_INTERVAL));
            }
            Ok(Action::requeue(REQUEUE_INTERVAL))
        }
        Err(e) => {
            status.set_condition(Condition::new(
                CONDITION_RECONCILE_COMPLETE,
                ConditionStatus::False,
                "ReconcileFailed",
                e.to_string(),
            ));
            if let Err(patch_err) = ctx.client.patch_status(&name, &namespace, status).await {
                warn!(error = %patch_err, "failed to record reconcile failure on status");
            }
            Err(e)
        }
    }
}

async fn teardown(
    hco: &HyperConverged,
    name: &str,
    namespace: &str,
    ctx: &Context,
) -> Result<Action> {
    if !has_finalizer(hco) {
        return Ok(Action::await_change());
    }
    let ssp_name = format!("{SSP_NAME_PREFIX}{name}");
    info!(ssp = %ssp_name, "parent deleted, removing SSP");
    let removed = ensure_deleted(
        ctx.ssp_store.as_ref(),
        &ssp_name,
        namespace,
        name,
        RemoveOptions {
            dry_run: false,
            wait: true,
        },
        &WaitContext::new(ctx.teardown_timeout),
    )
    .await?;
    debug!(removed, "SSP teardown finished");

    ctx.client
        .remove_finalizer(name, namespace, HCO_FINALIZER)
        .await?;
    Ok(Action::await_change())
}

/// Requeue policy for failed passes
pub fn error_policy(hco: Arc<HyperConverged>, error: &Error, _ctx: Arc<Context>) -> Action {
    error!(?error, hco = %hco.name_any(), "reconciliation failed");
    if error.is_retryable() {
        Action::requeue(Duration::from_secs(5))
    } else {
        Action::requeue(Duration::from_secs(30))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hco_common::crd::{HyperConvergedSpec, SspStatus, Version};
    use hco_common::testing::InMemoryStore;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
    use std::sync::Mutex as StdMutex;

    const NAME: &str = "kubevirt-hyperconverged";
    const NS: &str = "kubevirt-hyperconverged";
    const VERSION: &str = "1.4.0";

    /// Status client recording every write
    #[derive(Default)]
    struct Recorded {
        statuses: StdMutex<Vec<HyperConvergedStatus>>,
        added: StdMutex<Vec<String>>,
        removed: StdMutex<Vec<String>>,
    }

    #[async_trait]
    impl HcoStatusClient for Recorded {
        async fn patch_status(
            &self,
            _name: &str,
            _namespace: &str,
            status: &HyperConvergedStatus,
        ) -> Result<()> {
            self.statuses.lock().unwrap().push(status.clone());
            Ok(())
        }

        async fn add_finalizer(&self, _: &str, _: &str, finalizer: &str) -> Result<()> {
            self.added.lock().unwrap().push(finalizer.to_string());
            Ok(())
        }

        async fn remove_finalizer(&self, _: &str, _: &str, finalizer: &str) -> Result<()> {
            self.removed.lock().unwrap().push(finalizer.to_string());
            Ok(())
        }
    }

    impl Recorded {
        fn last_status(&self) -> Option<HyperConvergedStatus> {
            self.statuses.lock().unwrap().last().cloned()
        }

        fn patches(&self) -> usize {
            self.statuses.lock().unwrap().len()
        }
    }

    fn hco(generation: i64) -> HyperConverged {
        let mut hco = HyperConverged::new(NAME, HyperConvergedSpec::default());
        hco.metadata.namespace = Some(NS.to_string());
        hco.metadata.generation = Some(generation);
        hco.metadata.finalizers = Some(vec![HCO_FINALIZER.to_string()]);
        hco
    }

    fn context(
        store: Arc<InMemoryStore<Ssp>>,
        client: Arc<dyn HcoStatusClient>,
    ) -> Arc<Context> {
        Arc::new(Context::new(
            store,
            Arc::new(TemplateRegistry::new()),
            client,
            VERSION,
            Duration::from_secs(5),
        ))
    }

    fn ssp_name() -> String {
        format!("{SSP_NAME_PREFIX}{NAME}")
    }

    /// Story: the first pass creates the SSP and records a complete status
    #[tokio::test]
    async fn story_first_pass_creates_ssp_and_status() {
        let store = Arc::new(InMemoryStore::<Ssp>::new());
        let client = Arc::new(Recorded::default());
        let ctx = context(store.clone(), client.clone());

        let action = reconcile(Arc::new(hco(1)), ctx).await.unwrap();
        assert_eq!(action, Action::requeue(REQUEUE_INTERVAL));

        let ssp = store.stored(&ssp_name(), NS).expect("SSP created");
        assert_eq!(ssp.labels().get(APP_LABEL).map(String::as_str), Some(NAME));

        let status = client.last_status().expect("status patched");
        assert_eq!(status.observed_generation, Some(1));
        assert_eq!(status.version(HCO_VERSION_NAME), Some(VERSION));
        assert!(!status.data_import_schedule.as_deref().unwrap_or_default().is_empty());
        assert_eq!(status.related_objects.len(), 1);
        assert_eq!(status.related_objects[0].name.as_deref(), Some(ssp_name().as_str()));
        let cond = status.condition(CONDITION_RECONCILE_COMPLETE).unwrap();
        assert_eq!(cond.status, ConditionStatus::True);
    }

    #[tokio::test]
    async fn test_missing_finalizer_is_added_first() {
        let store = Arc::new(InMemoryStore::<Ssp>::new());
        let client = Arc::new(Recorded::default());
        let ctx = context(store.clone(), client.clone());
        let mut parent = hco(1);
        parent.metadata.finalizers = None;

        let action = reconcile(Arc::new(parent), ctx).await.unwrap();
        assert_eq!(action, Action::requeue(Duration::from_secs(1)));
        assert_eq!(*client.added.lock().unwrap(), vec![HCO_FINALIZER.to_string()]);
        assert!(store.is_empty());
    }

    /// Story: once status matches, further passes do not patch it again
    #[tokio::test]
    async fn story_steady_state_skips_status_patch() {
        let store = Arc::new(InMemoryStore::<Ssp>::new());
        let client = Arc::new(Recorded::default());
        let ctx = context(store.clone(), client.clone());

        reconcile(Arc::new(hco(1)), ctx.clone()).await.unwrap();
        let mut settled = hco(1);
        settled.status = client.last_status();

        reconcile(Arc::new(settled), ctx).await.unwrap();
        assert_eq!(client.patches(), 1);
    }

    /// Story: an out-of-band SSP edit is reverted on the next non-parent pass
    #[tokio::test]
    async fn story_out_of_band_edit_reverted() {
        let store = Arc::new(InMemoryStore::<Ssp>::new());
        let client = Arc::new(Recorded::default());
        let ctx = context(store.clone(), client.clone());

        reconcile(Arc::new(hco(1)), ctx.clone()).await.unwrap();
        let mut edited = store.stored(&ssp_name(), NS).unwrap();
        edited.spec.template_validator.replicas = Some(7);
        store.seed(edited);

        let mut settled = hco(1);
        settled.status = client.last_status();
        reconcile(Arc::new(settled), ctx).await.unwrap();

        let ssp = store.stored(&ssp_name(), NS).unwrap();
        assert_eq!(ssp.spec.template_validator.replicas, Some(2));
    }

    #[tokio::test]
    async fn test_existing_schedule_is_kept() {
        let store = Arc::new(InMemoryStore::<Ssp>::new());
        let client = Arc::new(Recorded::default());
        let ctx = context(store, client.clone());
        let mut parent = hco(1);
        parent.status = Some(HyperConvergedStatus {
            data_import_schedule: Some("17 */12 * * *".to_string()),
            ..Default::default()
        });

        reconcile(Arc::new(parent), ctx).await.unwrap();
        let status = client.last_status().unwrap();
        assert_eq!(status.data_import_schedule.as_deref(), Some("17 */12 * * *"));
    }

    /// Story: during an upgrade the version is recorded only once the SSP reports it
    #[tokio::test]
    async fn story_upgrade_waits_for_operand_version() {
        let store = Arc::new(InMemoryStore::<Ssp>::new());
        let client = Arc::new(Recorded::default());
        let ctx = context(store.clone(), client.clone());

        let mut parent = hco(1);
        parent.status = Some(HyperConvergedStatus {
            versions: vec![Version::new(HCO_VERSION_NAME, "1.3.0")],
            ..Default::default()
        });
        let action = reconcile(Arc::new(parent.clone()), ctx.clone()).await.unwrap();
        assert_eq!(action, Action::requeue(UPGRADE_REQUEUE_INTERVAL));
        let status = client.last_status().unwrap();
        assert_eq!(status.version(HCO_VERSION_NAME), Some("1.3.0"));

        let mut ssp = store.stored(&ssp_name(), NS).unwrap();
        ssp.status = Some(SspStatus {
            observed_version: Some(VERSION.to_string()),
            ..Default::default()
        });
        store.seed(ssp);
        parent.status = Some(status);

        let action = reconcile(Arc::new(parent), ctx).await.unwrap();
        assert_eq!(action, Action::requeue(REQUEUE_INTERVAL));
        let status = client.last_status().unwrap();
        assert_eq!(status.version(HCO_VERSION_NAME), Some(VERSION));
    }

    #[tokio::test]
    async fn test_failure_sets_condition_and_returns_error() {
        let store = Arc::new(InMemoryStore::<Ssp>::new());
        store.fail_gets_with(500, "InternalError");
        let client = Arc::new(Recorded::default());
        let ctx = context(store, client.clone());

        let err = reconcile(Arc::new(hco(2)), ctx).await.unwrap_err();
        assert!(err.is_retryable());

        let status = client.last_status().unwrap();
        let cond = status.condition(CONDITION_RECONCILE_COMPLETE).unwrap();
        assert_eq!(cond.status, ConditionStatus::False);
        assert_eq!(cond.reason, "ReconcileFailed");
        assert!(status.observed_generation.is_none());
    }

    /// Story: deleting the parent removes the SSP, then the finalizer
    #[tokio::test]
    async fn story_deletion_tears_down_ssp() {
        let store = Arc::new(InMemoryStore::<Ssp>::new());
        let client = Arc::new(Recorded::default());
        let ctx = context(store.clone(), client.clone());
        reconcile(Arc::new(hco(1)), ctx.clone()).await.unwrap();
        assert_eq!(store.len(), 1);

        let mut deleting = hco(1);
        deleting.metadata.deletion_timestamp = Some(Time(chrono::Utc::now()));
        let action = reconcile(Arc::new(deleting), ctx).await.unwrap();

        assert_eq!(action, Action::await_change());
        assert!(store.is_empty());
        assert_eq!(store.deleted(), vec![(NS.to_string(), ssp_name())]);
        assert_eq!(*client.removed.lock().unwrap(), vec![HCO_FINALIZER.to_string()]);
    }

    #[tokio::test]
    async fn test_deletion_leaves_foreign_ssp() {
        let store = Arc::new(InMemoryStore::<Ssp>::new());
        let mut foreign = Ssp::new(&ssp_name(), Default::default());
        foreign.metadata.namespace = Some(NS.to_string());
        foreign
            .labels_mut()
            .insert(APP_LABEL.to_string(), "someone-else".to_string());
        store.seed(foreign);
        let client = Arc::new(Recorded::default());
        let ctx = context(store.clone(), client.clone());

        let mut deleting = hco(1);
        deleting.metadata.deletion_timestamp = Some(Time(chrono::Utc::now()));
        reconcile(Arc::new(deleting), ctx).await.unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(client.removed.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_status_client_mock_sees_finalizer_removal() {
        let store = Arc::new(InMemoryStore::<Ssp>::new());
        let mut client = MockHcoStatusClient::new();
        client
            .expect_remove_finalizer()
            .withf(|name, ns, fin| name == NAME && ns == NS && fin == HCO_FINALIZER)
            .times(1)
            .returning(|_, _, _| Ok(()));
        client.expect_patch_status().never();
        let ctx = context(store, Arc::new(client));

        let mut deleting = hco(1);
        deleting.metadata.deletion_timestamp = Some(Time(chrono::Utc::now()));
        reconcile(Arc::new(deleting), ctx).await.unwrap();
    }

    #[test]
    fn test_parent_of_operand() {
        let mut ssp = Ssp::new(&ssp_name(), Default::default());
        assert!(parent_of_operand(&ssp).is_none());

        ssp.metadata.namespace = Some(NS.to_string());
        ssp.labels_mut()
            .insert(APP_LABEL.to_string(), NAME.to_string());
        let parent = parent_of_operand(&ssp).unwrap();
        assert_eq!(parent.name, NAME);
        assert_eq!(parent.namespace.as_deref(), Some(NS));
    }

    #[test]
    fn test_error_policy_backoff() {
        let client = Arc::new(Recorded::default());
        let ctx = context(Arc::new(InMemoryStore::new()), client);
        let parent = Arc::new(hco(1));

        let retryable = Error::internal("boom");
        assert_eq!(
            error_policy(parent.clone(), &retryable, ctx.clone()),
            Action::requeue(Duration::from_secs(5))
        );
        let permanent = Error::validation("bad templates");
        assert_eq!(
            error_policy(parent, &permanent, ctx),
            Action::requeue(Duration::from_secs(30))
        );
    }
}
