//! Back-references from the parent status to the operands it manages

use k8s_openapi::api::core::v1::ObjectReference;
use kube::Resource;

/// Reference to `obj` as recorded in `status.relatedObjects`
pub fn object_reference<K>(obj: &K) -> ObjectReference
where
    K: Resource<DynamicType = ()>,
{
    let meta = obj.meta();
    ObjectReference {
        api_version: Some(K::api_version(&()).into_owned()),
        kind: Some(K::kind(&()).into_owned()),
        name: meta.name.clone(),
        namespace: meta.namespace.clone(),
        resource_version: meta.resource_version.clone(),
        uid: meta.uid.clone(),
        ..Default::default()
    }
}

fn same_object(a: &ObjectReference, b: &ObjectReference) -> bool {
    a.api_version == b.api_version
        && a.kind == b.kind
        && a.namespace == b.namespace
        && a.name == b.name
}

/// Insert `reference`, replacing any existing reference to the same object
///
/// Identity ignores `resourceVersion` and `uid`, so a refreshed reference
/// replaces its stale predecessor instead of being appended beside it.
pub fn upsert_related_object(refs: &mut Vec<ObjectReference>, reference: ObjectReference) {
    match refs.iter_mut().find(|r| same_object(r, &reference)) {
        Some(existing) => *existing = reference,
        None => refs.push(reference),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hco_common::crd::{Ssp, SspSpec};

    fn ssp(name: &str, rv: &str) -> Ssp {
        let mut obj = Ssp::new(name, SspSpec::default());
        obj.metadata.namespace = Some("kubevirt-hyperconverged".to_string());
        obj.metadata.resource_version = Some(rv.to_string());
        obj
    }

    #[test]
    fn test_reference_carries_type_and_identity() {
        let r = object_reference(&ssp("ssp-a", "7"));
        assert_eq!(r.api_version.as_deref(), Some("ssp.kubevirt.io/v1beta1"));
        assert_eq!(r.kind.as_deref(), Some("SSP"));
        assert_eq!(r.name.as_deref(), Some("ssp-a"));
        assert_eq!(r.namespace.as_deref(), Some("kubevirt-hyperconverged"));
        assert_eq!(r.resource_version.as_deref(), Some("7"));
    }

    /// Story: a newer resourceVersion replaces the stale reference
    #[test]
    fn story_upsert_replaces_stale_reference() {
        let mut refs = Vec::new();
        upsert_related_object(&mut refs, object_reference(&ssp("ssp-a", "1")));
        upsert_related_object(&mut refs, object_reference(&ssp("ssp-a", "2")));

        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].resource_version.as_deref(), Some("2"));
    }

    #[test]
    fn test_upsert_keeps_distinct_objects() {
        let mut refs = vec![ObjectReference {
            api_version: Some("v1".to_string()),
            kind: Some("ConfigMap".to_string()),
            name: Some("ssp-a".to_string()),
            namespace: Some("kubevirt-hyperconverged".to_string()),
            ..Default::default()
        }];
        upsert_related_object(&mut refs, object_reference(&ssp("ssp-a", "1")));
        upsert_related_object(&mut refs, object_reference(&ssp("ssp-b", "1")));
        assert_eq!(refs.len(), 3);
    }
}
