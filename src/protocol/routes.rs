//! Topic catalogue and route resolution
//!
//! Single responsibility: name the closed set of topics the platform emits,
//! grouped by domain area, and map UI routes to the topics worth watching
//! while that route is active. Pure lookup tables; no state.

/// Livestock lifecycle events.
pub mod livestock {
    pub const UPDATED: &str = "livestock.updated";
    pub const WEIGHED: &str = "livestock.weighed";
    pub const MOVED: &str = "livestock.moved";
    pub const HEALTH: &str = "livestock.health";
}

/// Purchasing and supplier events.
pub mod purchasing {
    pub const PURCHASE_CREATED: &str = "purchase.created";
    pub const PURCHASE_APPROVED: &str = "purchase.approved";
    pub const SUPPLIER_UPDATED: &str = "supplier.updated";
}

/// Sales events.
pub mod sales {
    pub const SALE_CREATED: &str = "sale.created";
    pub const SALE_SETTLED: &str = "sale.settled";
    pub const CUSTOMER_UPDATED: &str = "customer.updated";
}

/// Inventory and feed stock events.
pub mod inventory {
    pub const STOCK_ADJUSTED: &str = "stock.adjusted";
    pub const FEED_LOW: &str = "feed.low";
}

/// Finance events. Topics under this prefix are permission-gated.
pub mod finance {
    pub const JOURNAL_POSTED: &str = "finance.journal.posted";
    pub const INVOICE_DUE: &str = "finance.invoice.due";
}

/// Cross-cutting topics delivered regardless of route.
pub mod system {
    pub const NOTIFICATION: &str = "system.notification";
    pub const BROADCAST: &str = "system.broadcast";
}

/// Topics every route receives on top of its own set.
pub const DEFAULT_TOPICS: &[&str] = &[system::NOTIFICATION, system::BROADCAST];

/// Route table. Exact entries first; entries ending in `/*` match any route
/// sharing the prefix. Longest matching wildcard prefix wins among wildcards.
const ROUTE_TOPICS: &[(&str, &[&str])] = &[
    (
        "/ho/pembelian",
        &[
            purchasing::PURCHASE_CREATED,
            purchasing::PURCHASE_APPROVED,
            purchasing::SUPPLIER_UPDATED,
        ],
    ),
    (
        "/ho/penjualan",
        &[sales::SALE_CREATED, sales::SALE_SETTLED, sales::CUSTOMER_UPDATED],
    ),
    (
        "/ho/keuangan",
        &[finance::JOURNAL_POSTED, finance::INVOICE_DUE],
    ),
    (
        "/unit/kandang",
        &[
            livestock::UPDATED,
            livestock::WEIGHED,
            livestock::MOVED,
            livestock::HEALTH,
        ],
    ),
    (
        "/unit/stok",
        &[inventory::STOCK_ADJUSTED, inventory::FEED_LOW],
    ),
    (
        "/ho/*",
        &[
            purchasing::PURCHASE_CREATED,
            sales::SALE_CREATED,
            finance::INVOICE_DUE,
        ],
    ),
    (
        "/unit/*",
        &[livestock::UPDATED, inventory::STOCK_ADJUSTED],
    ),
];

/// Resolve the topic set of interest for a route.
///
/// Precedence: exact entry, then the longest wildcard prefix entry, then
/// [`DEFAULT_TOPICS`].
pub fn resolve_topics(route: &str) -> &'static [&'static str] {
    for (pattern, topics) in ROUTE_TOPICS {
        if !pattern.ends_with("/*") && *pattern == route {
            return topics;
        }
    }

    let mut best: Option<(&str, &'static [&'static str])> = None;
    for (pattern, topics) in ROUTE_TOPICS {
        if let Some(prefix) = pattern.strip_suffix("/*") {
            if (route.starts_with(prefix)
                && route[prefix.len()..].starts_with('/'))
                || route == prefix
            {
                match best {
                    Some((current, _)) if current.len() >= prefix.len() => {}
                    _ => best = Some((prefix, topics)),
                }
            }
        }
    }
    if let Some((_, topics)) = best {
        return topics;
    }

    DEFAULT_TOPICS
}

/// True when the topic belongs to a permission-gated prefix.
pub fn is_gated_topic(topic: &str) -> bool {
    topic.starts_with("finance.") || topic.starts_with("admin.")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_match_wins_over_wildcard() {
        let topics = resolve_topics("/ho/pembelian");
        assert!(topics.contains(&purchasing::PURCHASE_APPROVED));
        assert!(!topics.contains(&sales::SALE_CREATED));
    }

    #[test]
    fn wildcard_covers_unlisted_subroutes() {
        let topics = resolve_topics("/ho/laporan");
        assert_eq!(
            topics,
            &[
                purchasing::PURCHASE_CREATED,
                sales::SALE_CREATED,
                finance::INVOICE_DUE,
            ]
        );
    }

    #[test]
    fn unmapped_route_gets_defaults() {
        assert_eq!(resolve_topics("/settings/profile"), DEFAULT_TOPICS);
        assert_eq!(resolve_topics("/"), DEFAULT_TOPICS);
    }

    #[test]
    fn wildcard_requires_path_boundary() {
        // "/hogwash" shares the string prefix "/ho" but is not under it.
        assert_eq!(resolve_topics("/hogwash"), DEFAULT_TOPICS);
    }

    #[test]
    fn bare_prefix_matches_its_own_wildcard() {
        let topics = resolve_topics("/unit");
        assert_eq!(topics, &[livestock::UPDATED, inventory::STOCK_ADJUSTED]);
    }

    #[test]
    fn gated_prefixes() {
        assert!(is_gated_topic(finance::JOURNAL_POSTED));
        assert!(is_gated_topic("admin.users.changed"));
        assert!(!is_gated_topic(livestock::UPDATED));
    }
}
