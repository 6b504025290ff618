use crate::engine::OpContext;
use crate::error::{CloudError, ErrorKind, Result};
use crate::provider::RemoteHandle;
use crate::query::{ManagedFilter, ResourceQuery};
use crate::registry::{ClassSpec, Ownership};
use crate::state::models::{project_src, ProjectRecord, ResourceRecord};

use super::SyncScope;

/// Owner fields applied to a synced record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Owner {
    pub domain_id: String,
    pub project_id: String,
    pub project_src: String,
}

impl Owner {
    fn of(record: &ResourceRecord) -> Self {
        Self {
            domain_id: record.domain_id.clone(),
            project_id: record.project_id.clone(),
            project_src: record.project_src.clone(),
        }
    }

    pub fn apply(&self, record: &mut ResourceRecord) {
        record.domain_id = self.domain_id.clone();
        record.project_id = self.project_id.clone();
        record.project_src = self.project_src.clone();
    }
}

/// Decide who owns a record after add or update.
///
/// Children follow their parent. A record whose project was set locally
/// keeps it. Otherwise a provider in "cloud" mode maps the remote project tag
/// onto a local project through the external-project registry, creating the
/// project when it does not exist yet; everything else falls back to the
/// provider's own domain and project.
pub async fn resolve_owner(
    cx: &OpContext,
    spec: &ClassSpec,
    scope: &SyncScope,
    remote: &RemoteHandle,
    existing: Option<&ResourceRecord>,
) -> Result<Owner> {
    if spec.ownership == Ownership::Inherit {
        if let Some(ref parent) = scope.parent {
            return Ok(Owner::of(parent));
        }
    }
    if let Some(existing) = existing {
        if existing.project_src == project_src::LOCAL || !scope.provider.maps_cloud_projects() {
            return Ok(Owner::of(existing));
        }
    }

    let provider = &scope.provider;
    let fallback = Owner {
        domain_id: provider.domain_id.clone(),
        project_id: provider.project_id.clone(),
        project_src: project_src::SYSTEM.to_string(),
    };
    if !provider.maps_cloud_projects() {
        return Ok(fallback);
    }
    let Some(tag) = remote.project_id().filter(|t| !t.is_empty()) else {
        return Ok(fallback);
    };

    let project_id = match find_external_project(cx, &provider.id, tag).await? {
        Some(ep) => match ep.attr_str("project_id") {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => ensure_project(cx, &provider.domain_id, &ep.name).await?.id,
        },
        None => ensure_project(cx, &provider.domain_id, tag).await?.id,
    };
    Ok(Owner {
        domain_id: provider.domain_id.clone(),
        project_id,
        project_src: project_src::CLOUD.to_string(),
    })
}

async fn find_external_project(
    cx: &OpContext,
    provider_id: &str,
    external_id: &str,
) -> Result<Option<ResourceRecord>> {
    let spec = cx.engine.spec("externalproject")?;
    let query = ResourceQuery::new(spec)
        .filter_by_managed(&ManagedFilter::provider(provider_id))
        .filter_by_external_id(external_id)
        .limit(1);
    Ok(cx.engine.store.fetch(&query).await?.into_iter().next())
}

/// Local project `name` in `domain_id`, created on first use.
pub async fn ensure_project(cx: &OpContext, domain_id: &str, name: &str) -> Result<ProjectRecord> {
    if let Some(project) = cx.engine.store.get_project_by_name(domain_id, name).await? {
        return Ok(project);
    }
    let project = ProjectRecord::new(domain_id, name);
    match cx.engine.store.insert_project(&project).await {
        Ok(()) => {
            tracing::info!(domain = domain_id, project = name, "Created project for cloud tag");
            Ok(project)
        }
        // Lost a race with another sync; take the winner's row.
        Err(e) if matches!(e.kind(), ErrorKind::Conflict(_)) => cx
            .engine
            .store
            .get_project_by_name(domain_id, name)
            .await?
            .ok_or_else(|| CloudError::not_found("project", name)),
        Err(e) => Err(e),
    }
}
