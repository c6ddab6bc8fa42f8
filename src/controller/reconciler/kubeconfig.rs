//! # Kubeconfig Fan-out
//!
//! A kubeconfig change re-enqueues every `UserSyncGithub` mirroring it. The
//! runtime calls this as the mapper of its `watches` relation; nothing is
//! reconciled here.

use crate::crd::UserSyncGithub;
use kube::runtime::reflector::ObjectRef;
use std::sync::Arc;

/// Syncs whose `spec.user` is `kubeconfig`
pub fn dependent_syncs<I>(kubeconfig: &str, syncs: I) -> Vec<ObjectRef<UserSyncGithub>>
where
    I: IntoIterator<Item = Arc<UserSyncGithub>>,
{
    syncs
        .into_iter()
        .filter(|sync| sync.spec.user == kubeconfig)
        .map(|sync| ObjectRef::from_obj(sync.as_ref()))
        .collect()
}
