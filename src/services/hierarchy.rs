// src/services/hierarchy.rs

//! Enumeration of the locations to crawl for an election.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::error::{AppError, Result};
use crate::models::{CrawlErrorEntry, ElectionType, LocationInfo, LocationNode, ProvinceEntry};
use crate::services::portal::ElectionPortal;
use crate::services::retry::{RetryPolicy, Sleeper};

/// Every leaf of one election, plus the catalog branches that could not be
/// listed.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    /// Leaves in crawl order
    pub locations: Vec<LocationNode>,
    pub failures: Vec<CrawlErrorEntry>,
}

/// Province → district (→ constituency) tree, fetched once per election
/// type and cached for the lifetime of the hierarchy.
pub struct LocationHierarchy {
    portal: Arc<dyn ElectionPortal>,
    retry: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
    canonical: Vec<ProvinceEntry>,
    cache: Mutex<HashMap<ElectionType, Arc<Catalog>>>,
}

impl LocationHierarchy {
    pub fn new(
        portal: Arc<dyn ElectionPortal>,
        retry: RetryPolicy,
        sleeper: Arc<dyn Sleeper>,
        canonical: Vec<ProvinceEntry>,
    ) -> Self {
        Self {
            portal,
            retry,
            sleeper,
            canonical,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Ordered leaves for `election`.
    pub async fn all_locations(&self, election: ElectionType) -> Result<Vec<LocationNode>> {
        Ok(self.catalog(election).await?.locations.clone())
    }

    /// Ordered leaves and listing failures for `election`.
    ///
    /// Fails only when the province list itself is unavailable.
    pub async fn catalog(&self, election: ElectionType) -> Result<Arc<Catalog>> {
        let mut cache = self.cache.lock().await;
        if let Some(catalog) = cache.get(&election) {
            return Ok(Arc::clone(catalog));
        }

        let catalog = Arc::new(self.load(election).await?);
        log::info!(
            "Catalog for {}: {} locations, {} unavailable branches",
            election,
            catalog.locations.len(),
            catalog.failures.len()
        );
        cache.insert(election, Arc::clone(&catalog));
        Ok(catalog)
    }

    async fn load(&self, election: ElectionType) -> Result<Catalog> {
        let portal = self.portal.as_ref();
        let sleeper = self.sleeper.as_ref();

        let provinces = self
            .retry
            .run(sleeper, "province catalog", move || portal.provinces(election))
            .await
            .map_err(|e| AppError::crawl("province catalog", e))?;
        let provinces = order_provinces(provinces, &self.canonical);

        let mut catalog = Catalog::default();
        for province in &provinces {
            let context = format!("district catalog of {}", province.name);
            let districts = match self
                .retry
                .run(sleeper, &context, move || portal.districts(election, province))
                .await
            {
                Ok(districts) => districts,
                Err(e) => {
                    log::error!("Skipping {}: {}", province.name, e);
                    catalog.failures.push(CrawlErrorEntry {
                        location: province.name.clone(),
                        reason: format!("district catalog unavailable: {e}"),
                    });
                    continue;
                }
            };
            if districts.is_empty() {
                log::warn!("No districts listed for {} ({})", province.name, province.code);
            }

            for district in &districts {
                let node = LocationNode::new(province, district);
                if !election.has_constituency_level() {
                    catalog.locations.push(node);
                    continue;
                }

                let context = format!("constituency catalog of {}", node.display_name());
                match self
                    .retry
                    .run(sleeper, &context, move || {
                        portal.constituencies(election, province, district)
                    })
                    .await
                {
                    Ok(subs) => {
                        if subs.is_empty() {
                            log::warn!("No constituencies listed for {}", node.display_name());
                        }
                        catalog
                            .locations
                            .extend(subs.iter().map(|sub| node.clone().with_subdistrict(sub)));
                    }
                    Err(e) => {
                        log::error!("Skipping {}: {}", node.display_name(), e);
                        catalog.failures.push(CrawlErrorEntry {
                            location: node.display_name(),
                            reason: format!("constituency catalog unavailable: {e}"),
                        });
                    }
                }
            }
        }

        Ok(catalog)
    }
}

/// Sort provinces by their position in `canonical`, matched by code and
/// then by name. Unknown provinces keep portal order after the known ones.
pub fn order_provinces(
    provinces: Vec<LocationInfo>,
    canonical: &[ProvinceEntry],
) -> Vec<LocationInfo> {
    let rank = |p: &LocationInfo| {
        canonical
            .iter()
            .position(|c| c.code == p.code)
            .or_else(|| canonical.iter().position(|c| c.name == p.name))
    };

    let mut ranked: Vec<(usize, LocationInfo)> = provinces
        .into_iter()
        .map(|p| match rank(&p) {
            Some(i) => (i, p),
            None => {
                log::warn!("Province {} ({}) is not in the canonical list", p.name, p.code);
                (usize::MAX, p)
            }
        })
        .collect();
    ranked.sort_by_key(|(i, _)| *i);
    ranked.into_iter().map(|(_, p)| p).collect()
}
