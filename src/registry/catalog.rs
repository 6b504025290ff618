use std::time::Duration;

use super::status::{
    CachedImageStatus, DnsZoneStatus, GenericStatus, LoadbalancerStatus, RouteStatus, StatusSet,
};
use super::{
    Capability, ChildPolicy, ClassSpec, FieldKind, FieldSpec, Locality, Ownership, Registry,
    RelationSpec,
};
use crate::error::Result;

/// Build the registry with every class the engine knows how to reconcile.
pub fn builtin(image_refresh: Duration) -> Result<Registry> {
    let mut registry = Registry::new();

    // ─── Geography ──────────────────────────────────────────────────────────

    registry.register(
        ClassSpec::new("cloudregion", "cloudregions")
            .owned_by(Ownership::Public)
            .locality(Locality::Global)
            .capabilities(&[Capability::Syncable])
            .field(FieldSpec::string("city").synced())
            .field(FieldSpec::string("country_code").synced()),
    )?;
    registry.register(
        ClassSpec::new("zone", "zones")
            .child_of("cloudregion", ChildPolicy::Cascade)
            .owned_by(Ownership::Public)
            .locality(Locality::Zonal)
            .capabilities(&[Capability::Syncable]),
    )?;
    registry.register(
        ClassSpec::new("externalproject", "externalprojects")
            .owned_by(Ownership::Domain)
            .locality(Locality::Global)
            .capabilities(&[Capability::Syncable])
            // Local project bound to this one; set during sync.
            .field(FieldSpec::string("project_id")),
    )?;

    // ─── Networking ─────────────────────────────────────────────────────────

    registry.register(
        ClassSpec::new("vpc", "vpcs")
            .owned_by(Ownership::Domain)
            .field(FieldSpec::new("cidr_block", FieldKind::Cidr).synced().required())
            .field(FieldSpec::string("ipv6_cidr_block").synced().optional())
            .field(FieldSpec::new("is_default", FieldKind::Bool).synced()),
    )?;
    registry.register(
        ClassSpec::new("network", "networks")
            .child_of("vpc", ChildPolicy::Block)
            .locality(Locality::Zonal)
            .field(FieldSpec::new("guest_ip_start", FieldKind::Ipv4).synced().required())
            .field(FieldSpec::new("guest_ip_end", FieldKind::Ipv4).synced().required())
            .field(FieldSpec::int("guest_ip_mask").synced().required())
            .field(FieldSpec::new("guest_gateway", FieldKind::Ipv4).synced().optional())
            .field(FieldSpec::int("vlan_id").synced().optional())
            .field(FieldSpec::string("wire_id").synced().optional()),
    )?;
    registry.register(
        ClassSpec::new("vpc_peering_connection", "vpc_peering_connections")
            .child_of("vpc", ChildPolicy::Cascade)
            .field(FieldSpec::string("peer_vpc_id").synced().required())
            .field(FieldSpec::string("peer_account_id").synced().optional()),
    )?;
    registry.register(
        ClassSpec::new("inter_vpc_network", "inter_vpc_networks")
            .owned_by(Ownership::Domain)
            .locality(Locality::Global)
            .action("add-vpcs")
            .action("remove-vpcs"),
    )?;
    registry.register(
        ClassSpec::new("inter_vpc_network_route", "inter_vpc_network_routes")
            .child_of("inter_vpc_network", ChildPolicy::Cascade)
            .capabilities(&[Capability::Syncable, Capability::Update])
            .statuses(StatusSet {
                ready: RouteStatus::Available.as_str(),
                updating: RouteStatus::UpdateRoute.as_str(),
                ..StatusSet::default()
            })
            .field(FieldSpec::new("cidr", FieldKind::Cidr).synced())
            .field(FieldSpec::string("instance_id").synced())
            .field(FieldSpec::string("instance_type").synced())
            .field(FieldSpec::string("instance_region_id").synced())
            .action("enable")
            .action("disable"),
    )?;
    registry.register(
        ClassSpec::new("global_network", "global_networks")
            .owned_by(Ownership::Domain)
            .locality(Locality::Global),
    )?;

    // ─── DNS ────────────────────────────────────────────────────────────────

    registry.register(
        ClassSpec::new("dns_zone", "dns_zones")
            .owned_by(Ownership::Domain)
            .locality(Locality::Global)
            .quota("dns_zone")
            .statuses(StatusSet {
                ready: DnsZoneStatus::Available.as_str(),
                creating: DnsZoneStatus::Creating.as_str(),
                deleting: DnsZoneStatus::Deleting.as_str(),
                ..StatusSet::default()
            })
            .field(FieldSpec::string("zone_type").synced().required())
            .field(FieldSpec::json("options").synced().optional().updatable())
            .action("cache")
            .action("uncache")
            .action("add-vpcs")
            .action("remove-vpcs")
            .action("sync-recordsets"),
    )?;
    registry.register(
        ClassSpec::new("dns_record", "dns_records")
            .child_of("dns_zone", ChildPolicy::Cascade)
            .locality(Locality::Global)
            .uniqueness(vec![vec!["parent_id", "name", "dns_type", "dns_value"]])
            .field(FieldSpec::string("dns_type").synced().required().updatable())
            .field(FieldSpec::string("dns_value").synced().required().updatable())
            .field(FieldSpec::int("ttl").synced().optional().updatable())
            .field(FieldSpec::int("mx_priority").synced().optional().updatable())
            .field(FieldSpec::string("policy_type").optional().updatable())
            .field(FieldSpec::string("policy_value").optional().updatable())
            .action("enable")
            .action("disable")
            .action("set-traffic-policies"),
    )?;

    // ─── Load balancing ─────────────────────────────────────────────────────

    let lb_statuses = StatusSet {
        ready: LoadbalancerStatus::Enabled.as_str(),
        creating: LoadbalancerStatus::Creating.as_str(),
        deleting: LoadbalancerStatus::StatusDeleting.as_str(),
        updating: LoadbalancerStatus::SyncConf.as_str(),
        ..StatusSet::default()
    };
    registry.register(
        ClassSpec::new("loadbalancer", "loadbalancers")
            .statuses(lb_statuses.clone())
            .field(FieldSpec::string("address").synced())
            .field(FieldSpec::string("address_type").synced().optional())
            .field(FieldSpec::string("network_type").synced().optional())
            .field(FieldSpec::string("charge_type").synced().optional()),
    )?;
    registry.register(
        ClassSpec::new("loadbalancer_listener", "loadbalancer_listeners")
            .child_of("loadbalancer", ChildPolicy::Cascade)
            .statuses(lb_statuses.clone())
            .field(FieldSpec::string("listener_type").synced().required())
            .field(FieldSpec::int("listener_port").synced().required())
            .field(FieldSpec::string("scheduler").synced().optional().updatable()),
    )?;
    registry.register(
        ClassSpec::new("loadbalancer_acl", "loadbalancer_acls")
            .statuses(StatusSet {
                ready: GenericStatus::Available.as_str(),
                updating: LoadbalancerStatus::SyncConf.as_str(),
                ..StatusSet::default()
            })
            .field(FieldSpec::json("acl_entries").synced().optional())
            .action("patch"),
    )?;

    // ─── Managed services ───────────────────────────────────────────────────

    registry.register(
        ClassSpec::new("elasticcache", "elasticcaches")
            .locality(Locality::Zonal)
            .statuses(StatusSet {
                ready: GenericStatus::Available.as_str(),
                updating: GenericStatus::ChangeConfig.as_str(),
                ..StatusSet::default()
            })
            .field(FieldSpec::string("engine").synced().required())
            .field(FieldSpec::string("engine_version").synced().required())
            .field(FieldSpec::string("instance_type").synced().required())
            .field(FieldSpec::int("capacity_mb").synced())
            .field(FieldSpec::string("arch_type").synced().optional())
            .field(FieldSpec::string("node_type").synced().optional())
            .field(FieldSpec::string("private_dns").synced())
            .field(FieldSpec::int("private_connect_port").synced())
            .action("change-config"),
    )?;
    for (keyword, plural) in [
        ("elasticcache_account", "elasticcache_accounts"),
        ("elasticcache_acl", "elasticcache_acls"),
        ("elasticcache_backup", "elasticcache_backups"),
        ("elasticcache_parameter", "elasticcache_parameters"),
    ] {
        registry.register(
            ClassSpec::new(keyword, plural)
                .child_of("elasticcache", ChildPolicy::Cascade)
                .locality(Locality::Zonal)
                .field(FieldSpec::json("properties").synced().optional()),
        )?;
    }

    registry.register(
        ClassSpec::new("dbinstance", "dbinstances")
            .locality(Locality::Zonal)
            .statuses(StatusSet {
                ready: GenericStatus::Available.as_str(),
                updating: GenericStatus::ChangeConfig.as_str(),
                ..StatusSet::default()
            })
            .field(FieldSpec::string("engine").synced().required())
            .field(FieldSpec::string("engine_version").synced().required())
            .field(FieldSpec::string("instance_type").synced().required())
            .field(FieldSpec::int("vcpu_count").synced())
            .field(FieldSpec::int("vmem_size_mb").synced())
            .field(FieldSpec::int("disk_size_gb").synced().optional())
            .field(FieldSpec::int("port").synced())
            .action("change-config"),
    )?;
    for (keyword, plural) in [
        ("dbinstance_account", "dbinstance_accounts"),
        ("dbinstance_database", "dbinstance_databases"),
        ("dbinstance_backup", "dbinstance_backups"),
    ] {
        registry.register(
            ClassSpec::new(keyword, plural)
                .child_of("dbinstance", ChildPolicy::Cascade)
                .locality(Locality::Zonal)
                .field(FieldSpec::json("properties").synced().optional()),
        )?;
    }

    registry.register(
        ClassSpec::new("kube_cluster", "kube_clusters")
            .field(FieldSpec::string("version").synced().optional())
            .field(FieldSpec::string("network_id").synced().optional()),
    )?;
    registry.register(
        ClassSpec::new("kube_node", "kube_nodes")
            .child_of("kube_cluster", ChildPolicy::Cascade)
            .capabilities(&[Capability::Syncable]),
    )?;
    registry.register(
        ClassSpec::new("kube_node_pool", "kube_node_pools")
            .child_of("kube_cluster", ChildPolicy::Cascade)
            .field(FieldSpec::int("desired_instance_count").synced().optional())
            .field(FieldSpec::string("instance_type").synced().optional()),
    )?;

    registry.register(
        ClassSpec::new("bucket", "buckets")
            .field(FieldSpec::string("storage_class").synced().optional())
            .field(FieldSpec::string("acl").synced().optional().updatable())
            .field(FieldSpec::int("size_bytes").synced()),
    )?;

    registry.register(
        ClassSpec::new("waf_instance", "waf_instances")
            .field(FieldSpec::string("waf_type").synced().required())
            .field(FieldSpec::string("default_action").synced().optional().updatable()),
    )?;
    registry.register(
        ClassSpec::new("waf_rule_group", "waf_rule_groups")
            .child_of("waf_instance", ChildPolicy::Cascade)
            .capabilities(&[Capability::Syncable])
            .field(FieldSpec::int("priority").synced()),
    )?;

    registry.register(
        ClassSpec::new("cachedimage", "cachedimages")
            .owned_by(Ownership::Public)
            .capabilities(&[Capability::Syncable, Capability::Delete])
            .cacheable(image_refresh)
            .statuses(StatusSet {
                ready: CachedImageStatus::Active.as_str(),
                creating: CachedImageStatus::Queued.as_str(),
                deleting: GenericStatus::Deleting.as_str(),
                updating: CachedImageStatus::Queued.as_str(),
                syncing: CachedImageStatus::Queued.as_str(),
                lost: CachedImageStatus::Deleted.as_str(),
            })
            .field(FieldSpec::int("size_bytes").synced())
            .field(FieldSpec::string("os_type").synced())
            .field(FieldSpec::string("image_type").synced()),
    )?;

    // ─── Relations ──────────────────────────────────────────────────────────

    registry.register_relation(RelationSpec {
        name: "dns_zone_vpc",
        left: "dns_zone",
        right: "vpc",
    })?;
    registry.register_relation(RelationSpec {
        name: "dns_zone_cache",
        left: "dns_zone",
        right: "cloudprovider",
    })?;
    registry.register_relation(RelationSpec {
        name: "global_network_vpc",
        left: "global_network",
        right: "vpc",
    })?;
    registry.register_relation(RelationSpec {
        name: "inter_vpc_network_vpc",
        left: "inter_vpc_network",
        right: "vpc",
    })?;
    Ok(registry)
}
