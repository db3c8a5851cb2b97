use std::{cmp::Reverse, collections::HashMap, sync::Arc, time::Duration};

use distributor_types::{
    BucketId, DataObjectRecord, FamilyMetadata, OperatorMetadata, StorageOperator,
};
use observability_deps::tracing::{debug, warn};
use parking_lot::RwLock;
use url::Url;

use crate::{LatencyTracker, ProbeTarget};

/// How closely an operator is associated with the serving node's family
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Affinity {
    None,
    Region,
    Family,
}

/// Ranks the access points of an object into an ordered list of candidate URLs.
///
/// Candidates are ordered by
/// 1. affinity of the operator to this node's family (same family, then same region),
/// 2. measured latency to the endpoint, falling back to the latency the operator declared,
///    endpoints with a latency ahead of those without,
/// 3. the order the access points were declared in.
///
/// Endpoints shared by several access points are only returned once.
#[derive(Debug)]
pub struct EndpointResolver {
    family: Option<FamilyMetadata>,
    operators: RwLock<HashMap<BucketId, OperatorMetadata>>,
    latency: Arc<LatencyTracker>,
}

impl EndpointResolver {
    pub fn new(family: Option<FamilyMetadata>, latency: Arc<LatencyTracker>) -> Self {
        Self {
            family,
            operators: Default::default(),
            latency,
        }
    }

    /// Replace the known storage operators
    pub fn set_operators(&self, operators: Vec<StorageOperator>) {
        let operators = operators
            .into_iter()
            .map(|o| (o.bucket_id, o.metadata))
            .collect();
        *self.operators.write() = operators;
    }

    /// Where to measure latency for each known operator endpoint: its first latency test target,
    /// or the endpoint itself
    pub fn probe_targets(&self) -> Vec<ProbeTarget> {
        let mut targets: Vec<ProbeTarget> = self
            .operators
            .read()
            .values()
            .map(|o| ProbeTarget {
                endpoint: o.endpoint.clone(),
                target: o
                    .latency_test_targets
                    .first()
                    .unwrap_or(&o.endpoint)
                    .clone(),
            })
            .collect();
        targets.sort_by(|a, b| a.endpoint.cmp(&b.endpoint));
        targets.dedup_by(|a, b| a.endpoint == b.endpoint);
        targets
    }

    fn affinity(&self, operator: Option<&OperatorMetadata>) -> Affinity {
        let (Some(family), Some(operator)) = (&self.family, operator) else {
            return Affinity::None;
        };
        if operator.family_id.as_ref() == Some(&family.family_id) {
            Affinity::Family
        } else if operator
            .country_code()
            .is_some_and(|c| family.covers_country(c))
        {
            Affinity::Region
        } else {
            Affinity::None
        }
    }

    fn latency(&self, endpoint: &Url, operator: Option<&OperatorMetadata>) -> Option<Duration> {
        self.latency.mean(endpoint).or_else(|| {
            operator
                .and_then(|o| o.declared_latency_ms)
                .map(Duration::from_millis)
        })
    }

    /// Ordered candidate URLs for `record`; empty when the object has no access points
    pub fn resolve(&self, record: &DataObjectRecord) -> Vec<Url> {
        let operators = self.operators.read();
        let mut ranked = Vec::with_capacity(record.access_points.len());
        for (index, access_point) in record.access_points.iter().enumerate() {
            if record.access_points[..index]
                .iter()
                .any(|a| a.endpoint == access_point.endpoint)
            {
                continue;
            }
            let url = match access_point.object_url(&record.object_id) {
                Ok(url) => url,
                Err(error) => {
                    warn!(
                        object_id = %record.object_id,
                        endpoint = %access_point.endpoint,
                        %error,
                        "skipping access point with unusable endpoint"
                    );
                    continue;
                }
            };
            let operator = operators.get(&access_point.bucket_id);
            let affinity = self.affinity(operator);
            let latency = self.latency(&access_point.endpoint, operator);
            // `None` sorts ahead of `Some`, so rank endpoints without a latency last explicitly
            let latency_key = (latency.is_none(), latency);
            ranked.push(((Reverse(affinity), latency_key, index), url));
        }
        ranked.sort_by(|(a, _), (b, _)| a.cmp(b));
        let candidates: Vec<Url> = ranked.into_iter().map(|(_, url)| url).collect();
        debug!(
            object_id = %record.object_id,
            candidates = candidates.len(),
            "resolved candidate endpoints"
        );
        candidates
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use distributor_test_helpers::{endpoint, object_url, record, snapshot};
    use distributor_types::{FamilyId, GeoArea, NodeLocation};
    use pretty_assertions::assert_eq;

    fn family() -> FamilyMetadata {
        FamilyMetadata {
            family_id: "eu".parse().unwrap(),
            region: None,
            description: None,
            areas: vec![GeoArea::CountryCode("DE".to_string())],
            latency_test_targets: vec![],
        }
    }

    fn located(country: &str) -> Option<NodeLocation> {
        Some(NodeLocation {
            country_code: Some(country.to_string()),
            ..Default::default()
        })
    }

    #[test]
    fn declaration_order_without_metadata() {
        let record = record("1", b"one", &[endpoint(0), endpoint(1), endpoint(2)]);
        let resolver = EndpointResolver::new(None, Default::default());
        assert_eq!(
            resolver.resolve(&record),
            vec![
                object_url(&record, 0),
                object_url(&record, 1),
                object_url(&record, 2),
            ]
        );
    }

    #[test]
    fn empty_without_access_points() {
        let record = record("1", b"one", &[]);
        let resolver = EndpointResolver::new(Some(family()), Default::default());
        assert!(resolver.resolve(&record).is_empty());
    }

    #[test]
    fn family_then_region_then_rest() {
        let record = record("1", b"one", &[endpoint(0), endpoint(1), endpoint(2)]);
        let mut operators = snapshot(&[record.clone()]).storage_operators;
        operators[1].metadata.location = located("DE");
        operators[2].metadata.family_id = Some(FamilyId::try_from("eu".to_string()).unwrap());

        let resolver = EndpointResolver::new(Some(family()), Default::default());
        resolver.set_operators(operators);
        assert_eq!(
            resolver.resolve(&record),
            vec![
                object_url(&record, 2),
                object_url(&record, 1),
                object_url(&record, 0),
            ]
        );
    }

    #[test]
    fn latency_breaks_ties_measured_before_declared() {
        let record = record("1", b"one", &[endpoint(0), endpoint(1), endpoint(2), endpoint(3)]);
        let mut operators = snapshot(&[record.clone()]).storage_operators;
        operators[1].metadata.declared_latency_ms = Some(80);

        let latency = Arc::new(LatencyTracker::new());
        latency.record(&endpoint(2), Duration::from_millis(20));
        // a measurement overrides the declared value
        latency.record(&endpoint(3), Duration::from_millis(50));
        operators[3].metadata.declared_latency_ms = Some(5);

        let resolver = EndpointResolver::new(None, latency);
        resolver.set_operators(operators);
        assert_eq!(
            resolver.resolve(&record),
            vec![
                object_url(&record, 2),
                object_url(&record, 3),
                object_url(&record, 1),
                object_url(&record, 0),
            ]
        );
    }

    #[test]
    fn duplicate_endpoints_collapse() {
        let record = record("1", b"one", &[endpoint(0), endpoint(1), endpoint(0)]);
        let resolver = EndpointResolver::new(None, Default::default());
        assert_eq!(
            resolver.resolve(&record),
            vec![object_url(&record, 0), object_url(&record, 1)]
        );
    }

    #[test]
    fn probe_targets_prefer_declared_targets() {
        let record = record("1", b"one", &[endpoint(0), endpoint(1)]);
        let mut operators = snapshot(&[record]).storage_operators;
        let target: Url = "http://probe.test/ping".parse().unwrap();
        operators[0].metadata.latency_test_targets = vec![target.clone()];

        let resolver = EndpointResolver::new(None, Default::default());
        resolver.set_operators(operators);
        assert_eq!(
            resolver.probe_targets(),
            vec![
                ProbeTarget {
                    endpoint: endpoint(0),
                    target,
                },
                ProbeTarget {
                    endpoint: endpoint(1),
                    target: endpoint(1),
                },
            ]
        );
    }
}
