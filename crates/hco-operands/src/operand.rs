//! Generic operand reconciliation
//!
//! [`OperandHandler`] drives one operand kind towards the object its
//! [`OperandHooks`] build from the parent. Each call to
//! [`OperandHandler::ensure`] is a single pass with one of four outcomes:
//!
//! | Observed            | Outcome                                   |
//! |---------------------|-------------------------------------------|
//! | missing             | create, `created`                         |
//! | owned fields equal  | nothing written                           |
//! | differs, parent edit| owned fields written, `updated`           |
//! | differs, other edit | owned fields written, `updated` and `overwritten` |
//!
//! An observed operand whose owner label does not name the parent is never
//! written: the pass ends `unchanged` and no reference is recorded for it.
//!
//! The related-object reference on the parent status is refreshed on every
//! successful pass over an owned operand. Store errors are returned as-is; retrying is up to the
//! surrounding controller.

use std::fmt::Debug;
use std::sync::Arc;

use hco_common::crd::HyperConverged;
use hco_common::store::ObjectStore;
use hco_common::{Result, APP_LABEL};
use k8s_openapi::api::core::v1::ObjectReference;
use kube::{Resource, ResourceExt};
use tracing::{debug, info, instrument, warn};

use crate::related::{object_reference, upsert_related_object};
use crate::request::HcoRequest;

/// Outcome of one operand pass
///
/// Flags can only be combined through the constructors, so `overwritten`
/// never appears without `updated`, and `created` never with either.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReconcileResult {
    created: bool,
    updated: bool,
    overwritten: bool,
    upgrade_done: bool,
}

impl ReconcileResult {
    /// The operand did not exist and was created
    pub fn created() -> Self {
        Self {
            created: true,
            ..Default::default()
        }
    }

    /// The operand already matched
    pub fn unchanged() -> Self {
        Self::default()
    }

    /// The operand was updated; `overwritten` when the change being reverted
    /// did not come from the parent
    pub fn updated(overwritten: bool) -> Self {
        Self {
            updated: true,
            overwritten,
            ..Default::default()
        }
    }

    /// Record whether the operand finished a version rollout
    pub fn with_upgrade_done(mut self, upgrade_done: bool) -> Self {
        self.upgrade_done = upgrade_done;
        self
    }

    /// Operand was created
    pub fn is_created(&self) -> bool {
        self.created
    }

    /// Operand was updated
    pub fn is_updated(&self) -> bool {
        self.updated
    }

    /// Operand had out-of-band edits reverted
    pub fn is_overwritten(&self) -> bool {
        self.overwritten
    }

    /// Operand reports the running operator version
    pub fn is_upgrade_done(&self) -> bool {
        self.upgrade_done
    }
}

/// Per-kind behavior plugged into [`OperandHandler`]
pub trait OperandHooks: Send + Sync {
    /// Operand kind
    type Object: Resource<DynamicType = ()> + Clone + Debug + Send + Sync + 'static;

    /// Build the desired operand from the parent
    fn build(&self, hco: &HyperConverged) -> Result<Self::Object>;

    /// Desired operand for the current cycle, built at most once until [`reset`]
    ///
    /// [`reset`]: OperandHooks::reset
    fn full_cr(&mut self, hco: &HyperConverged) -> Result<Arc<Self::Object>>;

    /// Forget the desired operand cached for the current cycle
    fn reset(&mut self);

    /// True when the fields this operator owns differ
    fn needs_update(&self, desired: &Self::Object, observed: &Self::Object) -> bool;

    /// Copy the owned fields of `desired` onto `observed`
    fn apply_owned_fields(&self, desired: &Self::Object, observed: &mut Self::Object);

    /// True when `observed` carries the owner label of `desired`
    fn is_owned(&self, desired: &Self::Object, observed: &Self::Object) -> bool {
        match desired.labels().get(APP_LABEL) {
            Some(owner) => observed.labels().get(APP_LABEL) == Some(owner),
            None => false,
        }
    }

    /// True when `observed` has finished rolling out `req.version`
    fn upgrade_done(&self, _req: &HcoRequest, _observed: &Self::Object) -> bool {
        false
    }

    /// Reference recorded on the parent status
    fn object_reference(&self, obj: &Self::Object) -> ObjectReference {
        object_reference(obj)
    }
}

/// Reconciles one operand kind
///
/// Not meant to be shared between concurrent passes: callers serialize
/// access, e.g. behind a mutex per handler.
pub struct OperandHandler<H: OperandHooks> {
    hooks: H,
    store: Arc<dyn ObjectStore<H::Object>>,
}

impl<H: OperandHooks> OperandHandler<H> {
    /// Handler writing through `store`
    pub fn new(hooks: H, store: Arc<dyn ObjectStore<H::Object>>) -> Self {
        Self { hooks, store }
    }

    /// The per-kind hooks
    pub fn hooks(&self) -> &H {
        &self.hooks
    }

    /// Start a new cycle: the next pass rebuilds the desired operand
    pub fn reset(&mut self) {
        self.hooks.reset();
    }

    /// Run one pass for the operand of `req.instance`
    #[instrument(skip(self, req), fields(hco = %req.name(), hco_triggered = req.hco_triggered))]
    pub async fn ensure(&mut self, req: &mut HcoRequest) -> Result<ReconcileResult> {
        let desired = self.hooks.full_cr(&req.instance)?;
        let kind = <H::Object as Resource>::kind(&());
        let name = desired.name_any();
        let namespace = desired.namespace().unwrap_or_default();

        let Some(mut observed) = self.store.get(&name, &namespace).await? else {
            info!(%kind, %name, %namespace, "creating operand");
            let created = self.store.create(desired.as_ref()).await?;
            self.record_reference(req, &created);
            return Ok(ReconcileResult::created());
        };

        if !self.hooks.is_owned(&desired, &observed) {
            warn!(
                %kind, %name, %namespace,
                owner = ?observed.labels().get(APP_LABEL),
                "operand not owned by this parent, leaving it untouched"
            );
            return Ok(ReconcileResult::unchanged());
        }

        let upgrade_done = self.hooks.upgrade_done(req, &observed);

        if !self.hooks.needs_update(&desired, &observed) {
            debug!(%kind, %name, %namespace, "operand up to date");
            self.record_reference(req, &observed);
            return Ok(ReconcileResult::unchanged().with_upgrade_done(upgrade_done));
        }

        let overwritten = !req.hco_triggered;
        if overwritten {
            info!(%kind, %name, %namespace, "reverting out-of-band modification of operand");
        } else {
            info!(%kind, %name, %namespace, "updating operand to the new parent spec");
        }
        self.hooks.apply_owned_fields(&desired, &mut observed);
        let updated = self.store.update(&observed).await?;
        self.record_reference(req, &updated);
        Ok(ReconcileResult::updated(overwritten).with_upgrade_done(upgrade_done))
    }

    fn record_reference(&self, req: &mut HcoRequest, obj: &H::Object) {
        let reference = self.hooks.object_reference(obj);
        let status = req.instance.status.get_or_insert_with(Default::default);
        upsert_related_object(&mut status.related_objects, reference);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_constructors_keep_flags_consistent() {
        let created = ReconcileResult::created();
        assert!(created.is_created());
        assert!(!created.is_updated());
        assert!(!created.is_overwritten());

        let unchanged = ReconcileResult::unchanged();
        assert_eq!(unchanged, ReconcileResult::default());

        let updated = ReconcileResult::updated(false);
        assert!(updated.is_updated());
        assert!(!updated.is_overwritten());
        assert!(!updated.is_created());

        let overwritten = ReconcileResult::updated(true);
        assert!(overwritten.is_updated());
        assert!(overwritten.is_overwritten());
    }

    #[test]
    fn test_upgrade_done_is_orthogonal() {
        let r = ReconcileResult::unchanged().with_upgrade_done(true);
        assert!(r.is_upgrade_done());
        assert!(!r.is_updated());

        let r = ReconcileResult::updated(true).with_upgrade_done(true);
        assert!(r.is_upgrade_done());
        assert!(r.is_overwritten());
    }
}
