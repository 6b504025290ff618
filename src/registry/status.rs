//! Status literals, centralized per class family. The string forms are wire
//! values that operators and remote tooling match on.

use crate::error::CloudError;

macro_rules! status_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $lit:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $lit),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = CloudError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($lit => Ok($name::$variant),)+
                    other => Err(CloudError::input_parameter(format!(
                        "unknown {} '{}'",
                        stringify!($name),
                        other
                    ))),
                }
            }
        }
    };
}

status_enum!(
    /// Statuses shared by most resource classes.
    GenericStatus {
        Available => "available",
        Ready => "ready",
        Creating => "creating",
        Deleting => "deleting",
        Deleted => "deleted",
        Unknown => "unknown",
        Pending => "pending",
        Syncing => "syncing",
        SyncStatus => "sync_status",
        ChangeConfig => "change_config",
        CreateFailed => "create_failed",
        DeleteFailed => "delete_failed",
        UpdateFailed => "update_failed",
    }
);

status_enum!(
    DnsZoneStatus {
        Available => "available",
        Creating => "creating",
        Deleting => "deleting",
        Caching => "caching",
        Uncaching => "uncaching",
        SyncVpcs => "sync_vpcs",
        SyncRecordSets => "sync_record_sets",
        SyncRecordSetsFailed => "sync_record_sets_failed",
    }
);

status_enum!(
    LoadbalancerStatus {
        Enabled => "enabled",
        Disabled => "disabled",
        Creating => "creating",
        SyncConf => "sync_conf",
        StatusDeleting => "status_deleting",
    }
);

status_enum!(
    RouteStatus {
        Available => "available",
        UpdateRoute => "update_route",
        Unknown => "unknown",
    }
);

status_enum!(
    CachedImageStatus {
        Active => "active",
        Queued => "queued",
        Killed => "killed",
        Deleted => "deleted",
    }
);

status_enum!(
    /// Connectivity of a provider.
    ProviderStatus {
        Init => "init",
        Connected => "connected",
        Disconnected => "disconnected",
    }
);

status_enum!(
    /// Where a provider is in its reconciliation cycle.
    ProviderSyncStatus {
        Idle => "idle",
        StartSync => "start_sync",
        Syncing => "syncing",
    }
);

/// Failure status recorded when operation `op` fails, e.g. `create_failed`.
pub fn failed(op: &str) -> String {
    format!("{}_failed", op)
}

/// Per-class status vocabulary used by the generic lifecycle code.
#[derive(Debug, Clone)]
pub struct StatusSet {
    pub ready: &'static str,
    pub creating: &'static str,
    pub deleting: &'static str,
    pub updating: &'static str,
    pub syncing: &'static str,
    /// Status given to a record whose remote side vanished but cannot be removed.
    pub lost: &'static str,
}

impl Default for StatusSet {
    fn default() -> Self {
        Self {
            ready: GenericStatus::Available.as_str(),
            creating: GenericStatus::Creating.as_str(),
            deleting: GenericStatus::Deleting.as_str(),
            updating: GenericStatus::SyncStatus.as_str(),
            syncing: GenericStatus::SyncStatus.as_str(),
            lost: GenericStatus::Unknown.as_str(),
        }
    }
}

impl StatusSet {
    /// True while an asynchronous operation owns the record.
    pub fn is_transitional(&self, status: &str) -> bool {
        status == self.creating
            || status == self.deleting
            || (status == self.updating && self.updating != self.ready)
            || status == self.syncing
    }
}
