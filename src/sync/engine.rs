//! Three-way reconciliation of one class within one scope.

use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use tracing::{debug, info};

use super::{compare_sets, SyncOp, SyncOptions, SyncResult, SyncScope};
use crate::engine::OpContext;
use crate::error::Result;
use crate::provider::RemoteHandle;
use crate::query::{ManagedFilter, ResourceQuery};
use crate::registry::{Capability, ClassSpec, Locality};
use crate::state::models::ResourceRecord;

/// Local records of `spec` that `scope` covers and that carry an external id.
pub async fn local_set(cx: &OpContext, spec: &Arc<ClassSpec>, scope: &SyncScope) -> Result<Vec<ResourceRecord>> {
    let mut query = ResourceQuery::new(spec.clone())
        .filter_by_managed(&ManagedFilter::provider(&scope.provider.id))
        .filter_by_external_status(true);
    if let Some(ref parent) = scope.parent {
        query = query.filter_by_parent(&parent.id);
    } else if spec.locality != Locality::Global {
        if let Some(ref region) = scope.region {
            query = query.filter_by_region(Some(&region.id));
        }
    }
    cx.engine.store.fetch(&query).await
}

/// Reconcile `spec` in `scope` against the remote snapshot `remote`.
///
/// Top-level classes are serialized by the class lock for the scope; child
/// classes by a raw lock on the parent. The lock is held for the whole
/// add/update/remove fan-out. Per-record failures are counted, never fatal.
pub fn sync_class<'a>(
    cx: &'a OpContext,
    spec: Arc<ClassSpec>,
    scope: SyncScope,
    remote: Vec<RemoteHandle>,
    options: SyncOptions,
) -> BoxFuture<'a, SyncResult> {
    async move {
        let engine = &cx.engine;
        let mut result = SyncResult::with_limit(engine.config.sync.error_limit);

        let _scope_guard = match scope.parent {
            Some(ref parent) => {
                engine
                    .locks
                    .lock_raw(&cx.unit, &format!("{}:{}", parent.class, parent.id), spec.plural)
                    .await
            }
            None => {
                engine
                    .locks
                    .lock_class(&cx.unit, spec.keyword, &scope.key())
                    .await
            }
        };

        let local = match local_set(cx, &spec, &scope).await {
            Ok(local) => local,
            Err(e) => {
                result.error(spec.keyword, SyncOp::List, &scope.key(), &e);
                return result;
            }
        };
        let diff = compare_sets(local, remote);
        let hooks = engine.hooks(spec.keyword);

        for record in diff.removed {
            let _guard = engine
                .locks
                .lock_object(&cx.unit, spec.keyword, &record.id)
                .await;
            let current = match engine.store.get_resource(&spec, &record.id).await {
                Ok(Some(current)) => current,
                Ok(None) => continue,
                Err(e) => {
                    result.error(spec.keyword, SyncOp::Delete, &record.reference(), &e);
                    continue;
                }
            };
            match hooks.sync_remove(cx, &spec, &current).await {
                Ok(()) => result.deleted += 1,
                Err(e) => result.error(spec.keyword, SyncOp::Delete, &current.reference(), &e),
            }
        }

        for (record, handle) in diff.common {
            let synced = if options.xor {
                record
            } else {
                let guard = engine
                    .locks
                    .lock_object(&cx.unit, spec.keyword, &record.id)
                    .await;
                let outcome = match engine.store.get_resource(&spec, &record.id).await {
                    Ok(Some(current)) => hooks.sync_with_cloud(cx, &spec, &current, &handle, &scope).await,
                    Ok(None) => {
                        drop(guard);
                        continue;
                    }
                    Err(e) => Err(e),
                };
                drop(guard);
                match outcome {
                    Ok(synced) => {
                        result.updated += 1;
                        synced
                    }
                    Err(e) => {
                        result.error(spec.keyword, SyncOp::Update, &record.reference(), &e);
                        continue;
                    }
                }
            };
            let children = sync_children(cx, &spec, &scope, &synced, options.for_common_children()).await;
            result.merge(children);
        }

        for handle in diff.added {
            match hooks.new_from_cloud(cx, &spec, &handle, &scope).await {
                Ok(record) => {
                    result.added += 1;
                    let children = sync_children(cx, &spec, &scope, &record, SyncOptions::full()).await;
                    result.merge(children);
                }
                Err(e) => result.error(spec.keyword, SyncOp::Add, handle.global_id(), &e),
            }
        }

        if scope.parent.is_none() {
            info!(
                class = spec.keyword,
                provider = %scope.provider.name,
                scope = %scope.key(),
                %result,
                "Synced class"
            );
        } else {
            debug!(class = spec.keyword, %result, "Synced child class");
        }
        result
    }
    .boxed()
}

/// Reconcile every syncable child class of `record`, in the same call stack.
pub fn sync_children<'a>(
    cx: &'a OpContext,
    spec: &'a ClassSpec,
    scope: &'a SyncScope,
    record: &'a ResourceRecord,
    options: SyncOptions,
) -> BoxFuture<'a, SyncResult> {
    async move {
        let mut result = SyncResult::with_limit(cx.engine.config.sync.error_limit);
        for child_spec in cx.engine.registry.children_of(spec.keyword) {
            if !child_spec.has(Capability::Syncable) {
                continue;
            }
            let child_scope = scope.child(record);
            let listed = if child_spec.keyword == "zone" {
                scope.driver.list_zones(&record.external_id).await
            } else {
                scope
                    .driver
                    .list_resources(child_spec.keyword, &child_scope.remote())
                    .await
            };
            match listed {
                Ok(remote) => {
                    let synced = sync_class(cx, child_spec, child_scope, remote, options).await;
                    result.merge(synced);
                }
                Err(e) => result.error(child_spec.keyword, SyncOp::List, &record.reference(), &e),
            }
        }
        result
    }
    .boxed()
}
