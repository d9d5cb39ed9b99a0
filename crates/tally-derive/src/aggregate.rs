use tally_core::{CounterSet, MonthActivity, MonthBucket, NamespaceNode, Origin};

/// Fill every non-reported ancestor from its children and flag mismatches.
///
/// Reported counts are the source of record and are never overridden;
/// `Absent` and `Derived` counts are (re)computed from children, so running
/// this twice gives the same result as running it once.
pub fn aggregate(bucket: &MonthBucket) -> MonthBucket {
    let new_clients = bucket
        .new_clients
        .as_deref()
        .map(|nc| Box::new(aggregate_level(nc)));
    MonthBucket {
        new_clients,
        ..aggregate_level(bucket)
    }
}

/// Aggregate one bucket, ignoring its `new_clients`.
fn aggregate_level(bucket: &MonthBucket) -> MonthBucket {
    let Some(activity) = &bucket.activity else {
        return MonthBucket {
            unreconciled: bucket.unreconciled,
            ..MonthBucket::empty(bucket.timestamp)
        };
    };

    let mut consistent = true;
    let namespaces: Vec<NamespaceNode> = activity
        .namespaces
        .iter()
        .map(|ns| {
            let (node, ok) = aggregate_namespace(ns);
            consistent &= ok;
            node
        })
        .collect();

    let (total, ok) = rollup(&activity.total, namespaces.iter().map(|ns| &ns.counts));
    consistent &= ok;
    if !ok {
        tracing::debug!(
            month = %bucket.timestamp,
            reported = total.clients,
            "month total disagrees with its namespaces"
        );
    }

    MonthBucket {
        timestamp: bucket.timestamp,
        activity: Some(MonthActivity { total, namespaces }),
        new_clients: None,
        unreconciled: bucket.unreconciled || !consistent,
    }
}

fn aggregate_namespace(ns: &NamespaceNode) -> (NamespaceNode, bool) {
    let mounts_ok = ns.mounts.iter().all(|m| m.counts.is_reconciled());
    let (counts, ok) = rollup(&ns.counts, ns.mounts.iter().map(|m| &m.counts));
    if !ok {
        tracing::debug!(
            namespace = %ns.label,
            clients = counts.clients,
            "namespace counts disagree with its mounts"
        );
    }
    let node = NamespaceNode {
        counts,
        ..ns.clone()
    };
    (node, ok && mounts_ok)
}

/// Resolve a parent's counts from its children. Returns the counts and
/// whether they are consistent.
fn rollup<'a, I>(own: &CounterSet, children: I) -> (CounterSet, bool)
where
    I: ExactSizeIterator<Item = &'a CounterSet>,
{
    match own.origin {
        Origin::Reported => {
            if children.len() == 0 {
                return (*own, own.is_reconciled());
            }
            let sum = CounterSet::sum(children);
            (*own, own.is_reconciled() && sum.clients == own.clients)
        }
        Origin::Derived | Origin::Absent => {
            let sum = CounterSet::sum(children);
            (sum, sum.is_reconciled())
        }
    }
}
