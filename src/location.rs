//! Site reconciliation against the geo-coordinate registry.
//!
//! A task references one or more base-station sites. When its site number or
//! site list changes, the list is re-resolved (registry first, then whatever the
//! caller supplied), a single map point is derived for display, and every site is
//! pushed back to the registry scoped by the project's operator and region.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::CollaboratorError;
use crate::fanout::FanOut;
use crate::normalize::{
    canonical_address, format_coordinates, normalize_site_number, parse_coordinates,
};
use crate::task::{Location, Project};

/// Operator/region pair that partitions the registry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryScope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
}

impl RegistryScope {
    pub fn for_project(project: &Project) -> Self {
        let clean = |v: &Option<String>| {
            v.as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_lowercase)
        };
        RegistryScope {
            operator: clean(&project.operator),
            region: clean(&project.region),
        }
    }
}

/// A base station as known to the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Station {
    /// Normalized site number.
    pub bs_number: String,
    #[serde(flatten)]
    pub scope: RegistryScope,
    pub coordinates: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    #[serde(default)]
    pub address: String,
}

impl Station {
    /// The station as a task site entry.
    pub fn to_location(&self, base_address: Option<&str>) -> Location {
        Location {
            name: self.bs_number.clone(),
            coordinates: self.coordinates.trim().to_string(),
            address: canonical_address(Some(&self.address), base_address, Some(&self.bs_number)),
        }
    }
}

/// Payload of the operator/region-level coordinate collection sync.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperatorSiteSync {
    pub task_id: String,
    pub task_code: String,
    /// Omitted when the task spans several sites.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bs_number: Option<String>,
    pub locations: Vec<Location>,
}

/// The geo-coordinate registry collaborator.
#[async_trait]
pub trait GeoRegistry: Send + Sync {
    /// Look up a station by normalized site number within a scope.
    async fn find_station(
        &self,
        scope: &RegistryScope,
        bs_number: &str,
    ) -> Result<Option<Station>, CollaboratorError>;

    /// Create the station if absent, update it otherwise. The station carries its scope.
    async fn upsert_station(&self, station: &Station) -> Result<(), CollaboratorError>;

    /// Synchronize the operator/region-level coordinate collection.
    async fn sync_operator_sites(
        &self,
        scope: &RegistryScope,
        sync: &OperatorSiteSync,
    ) -> Result<(), CollaboratorError>;
}

/// Caller-supplied site data for a request, already normalized.
#[derive(Debug, Clone, Default)]
pub struct SiteInput {
    /// Site number after the request (trimmed), if any.
    pub bs_number: Option<String>,
    pub supplied_locations: Option<Vec<Location>>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub base_address: Option<String>,
}

impl SiteInput {
    fn supplied_point(&self) -> Option<(f64, f64)> {
        Some((self.latitude?, self.longitude?))
    }
}

/// Site list after the site number changed.
///
/// Preference order: the registry's record, the caller's site list, a single
/// site built from the caller's latitude/longitude, and finally an empty list.
pub fn resolve_after_number_change(found: Option<&Station>, input: &SiteInput) -> Vec<Location> {
    let base = input.base_address.as_deref();
    if let Some(station) = found {
        return vec![station.to_location(base)];
    }
    if let Some(sites) = &input.supplied_locations {
        return sites.clone();
    }
    match (&input.bs_number, input.supplied_point()) {
        (Some(number), Some((lat, lon))) => vec![Location {
            name: number.clone(),
            coordinates: format_coordinates(lat, lon),
            address: canonical_address(None, base, Some(number)),
        }],
        _ => Vec::new(),
    }
}

/// The single point shown on the map for a site list.
///
/// First site whose coordinates parse. A lone site with unparseable
/// coordinates falls back to the caller's latitude/longitude.
pub fn map_point(sites: &[Location], input: &SiteInput) -> Option<(f64, f64)> {
    if let Some(point) = sites.iter().find_map(|s| parse_coordinates(&s.coordinates)) {
        return Some(point);
    }
    if sites.len() == 1 {
        return input.supplied_point();
    }
    None
}

/// Registry records for every site of a task.
pub fn stations_for(sites: &[Location], scope: &RegistryScope, input: &SiteInput) -> Vec<Station> {
    let single = sites.len() == 1;
    sites
        .iter()
        .filter_map(|site| {
            let number = if site.name.trim().is_empty() {
                input.bs_number.as_deref().map(normalize_site_number)?
            } else {
                normalize_site_number(&site.name)
            };
            let point = parse_coordinates(&site.coordinates)
                .or_else(|| if single { input.supplied_point() } else { None });
            let coordinates = match (site.coordinates.trim(), point) {
                ("", Some((lat, lon))) => format_coordinates(lat, lon),
                (text, _) => text.to_string(),
            };
            Some(Station {
                bs_number: number,
                scope: scope.clone(),
                coordinates,
                latitude: point.map(|p| p.0),
                longitude: point.map(|p| p.1),
                address: site.address.clone(),
            })
        })
        .collect()
}

/// Registry work to do once the task is committed.
#[derive(Debug, Clone, PartialEq)]
pub struct SiteSync {
    pub scope: RegistryScope,
    pub stations: Vec<Station>,
    pub operator_sync: OperatorSiteSync,
}

impl SiteSync {
    pub fn new(
        task_id: &str,
        task_code: &str,
        sites: &[Location],
        scope: RegistryScope,
        input: &SiteInput,
    ) -> Self {
        let stations = stations_for(sites, &scope, input);
        let bs_number = if sites.len() > 1 {
            None
        } else {
            input.bs_number.clone()
        };
        SiteSync {
            operator_sync: OperatorSiteSync {
                task_id: task_id.to_string(),
                task_code: task_code.to_string(),
                bs_number,
                locations: sites.to_vec(),
            },
            scope,
            stations,
        }
    }

    /// Queue one upsert per station plus the operator collection sync.
    pub fn queue(self, fan_out: &mut FanOut, registry: &Arc<dyn GeoRegistry>) {
        for station in self.stations {
            let registry = Arc::clone(registry);
            fan_out.push(format!("geo.upsert:{}", station.bs_number), async move {
                registry.upsert_station(&station).await
            });
        }
        let registry = Arc::clone(registry);
        let scope = self.scope;
        let sync = self.operator_sync;
        fan_out.push("geo.operator_sync", async move {
            registry.sync_operator_sites(&scope, &sync).await
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn site(name: &str, coordinates: &str) -> Location {
        Location {
            name: name.into(),
            coordinates: coordinates.into(),
            address: format!("near {name}"),
        }
    }

    fn input(number: &str) -> SiteInput {
        SiteInput {
            bs_number: Some(number.into()),
            ..SiteInput::default()
        }
    }

    #[test]
    fn test_registry_record_wins() {
        let station = Station {
            bs_number: "1234".into(),
            scope: RegistryScope::default(),
            coordinates: "55.1 37.2".into(),
            latitude: Some(55.1),
            longitude: Some(37.2),
            address: "Lenina 1".into(),
        };
        let mut inp = input("1234");
        inp.latitude = Some(1.0);
        inp.longitude = Some(2.0);
        let sites = resolve_after_number_change(Some(&station), &inp);
        assert_eq!(sites, vec![Location {
            name: "1234".into(),
            coordinates: "55.1 37.2".into(),
            address: "Lenina 1".into(),
        }]);
    }

    #[test]
    fn test_unknown_site_uses_caller_point_then_clears() {
        let mut inp = input("1234");
        inp.latitude = Some(55.0);
        inp.longitude = Some(37.0);
        inp.base_address = Some("Moscow".into());
        let sites = resolve_after_number_change(None, &inp);
        assert_eq!(sites, vec![Location {
            name: "1234".into(),
            coordinates: "55 37".into(),
            address: "Moscow".into(),
        }]);

        assert!(resolve_after_number_change(None, &input("1234")).is_empty());
    }

    #[test]
    fn test_caller_list_used_as_is_when_registry_misses() {
        let mut inp = input("1234");
        inp.supplied_locations = Some(vec![site("A", "1 2"), site("B", "3 4")]);
        let sites = resolve_after_number_change(None, &inp);
        assert_eq!(sites.len(), 2);
        assert_eq!(sites[1].name, "B");
    }

    #[test]
    fn test_map_point_fallbacks() {
        let mut inp = input("1");
        inp.latitude = Some(10.0);
        inp.longitude = Some(20.0);
        assert_eq!(map_point(&[site("1", "55 37")], &inp), Some((55.0, 37.0)));
        assert_eq!(map_point(&[site("1", "n/a")], &inp), Some((10.0, 20.0)));
        assert_eq!(map_point(&[site("1", "n/a"), site("2", "n/a")], &inp), None);
        assert_eq!(map_point(&[site("1", "n/a"), site("2", "1 2")], &inp), Some((1.0, 2.0)));
    }

    #[test]
    fn test_multi_site_sync_omits_single_number() {
        let sites = [site("a-1", "1 2"), site("a-2", "bad")];
        let sync = SiteSync::new("t1", "T-1", &sites, RegistryScope::default(), &input("A-1"));
        assert_eq!(sync.operator_sync.bs_number, None);
        assert_eq!(sync.operator_sync.locations.len(), 2);
        assert_eq!(sync.stations.len(), 2);
        assert_eq!(sync.stations[0].bs_number, "A-1");
        assert_eq!(sync.stations[1].latitude, None);

        let scope = RegistryScope::default();
        let single = SiteSync::new("t1", "T-1", &sites[..1], scope, &input("A-1"));
        assert_eq!(single.operator_sync.bs_number.as_deref(), Some("A-1"));
    }

    #[test]
    fn test_scope_is_derived_from_project() {
        let project = Project {
            id: "p".into(),
            org_id: "o".into(),
            name: "North".into(),
            operator: Some(" T2 ".into()),
            region: Some("".into()),
        };
        let scope = RegistryScope::for_project(&project);
        assert_eq!(scope.operator.as_deref(), Some("t2"));
        assert_eq!(scope.region, None);
    }
}
