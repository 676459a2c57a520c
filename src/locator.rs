//! Candidate lookup for dispatch.
//!
//! The dispatch core only needs "the best contractor not yet offered this
//! job". [`RosterLocator`] answers that from a static TOML roster using
//! great-circle distance; anything smarter plugs in behind [`ContractorLocator`].

use std::collections::BTreeSet;
use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::dispatch::{DispatchRequest, GeoPoint};
use crate::error::DispatchError;

const EARTH_RADIUS_MILES: f64 = 3959.0;

/// Contractors this close to each other in distance are ordered by rating instead.
const RATING_BAND_MILES: f64 = 5.0;

/// A contractor the locator proposes for the next offer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Candidate {
    pub contractor_id: String,
    pub name: String,
    pub distance_miles: f64,
    pub rating: f64,
}

#[async_trait]
pub trait ContractorLocator: Send + Sync {
    /// Best remaining candidate for `request`, skipping everyone in `exclude`.
    async fn next_candidate(
        &self,
        request: &DispatchRequest,
        exclude: &BTreeSet<String>,
    ) -> Result<Option<Candidate>, DispatchError>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Availability {
    #[default]
    Available,
    Busy,
    Offline,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractorProfile {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub lat: f64,
    pub lng: f64,
    #[serde(default)]
    pub rating: f64,
    #[serde(default)]
    pub completed_jobs: u32,
    #[serde(default)]
    pub availability: Availability,
    #[serde(default)]
    pub verified: bool,
}

#[derive(Debug, Deserialize)]
struct RosterFile {
    #[serde(default)]
    contractors: Vec<ContractorProfile>,
}

/// Great-circle distance in miles (haversine).
pub fn distance_miles(a: GeoPoint, b: GeoPoint) -> f64 {
    let d_lat = (b.lat - a.lat).to_radians();
    let d_lng = (b.lng - a.lng).to_radians();
    let h = (d_lat / 2.0).sin().powi(2)
        + a.lat.to_radians().cos() * b.lat.to_radians().cos() * (d_lng / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_MILES * h.sqrt().atan2((1.0 - h).sqrt())
}

/// Locator over a fixed list of contractor profiles.
#[derive(Debug, Clone)]
pub struct RosterLocator {
    contractors: Vec<ContractorProfile>,
    max_distance_miles: f64,
}

impl RosterLocator {
    pub fn new(contractors: Vec<ContractorProfile>, max_distance_miles: f64) -> Self {
        Self {
            contractors,
            max_distance_miles,
        }
    }

    /// Load a roster file (`[[contractors]]` tables). A missing file is an empty roster.
    pub fn load(path: &Path, max_distance_miles: f64) -> Result<Self> {
        if !path.exists() {
            tracing::warn!(path = %path.display(), "Roster file not found, no contractors available");
            return Ok(Self::new(Vec::new(), max_distance_miles));
        }
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading roster {}", path.display()))?;
        let roster: RosterFile = toml::from_str(&contents)
            .with_context(|| format!("parsing roster {}", path.display()))?;
        Ok(Self::new(roster.contractors, max_distance_miles))
    }

    pub fn len(&self) -> usize {
        self.contractors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contractors.is_empty()
    }

    /// Every eligible contractor for `request`, best first.
    pub fn ranked(&self, request: &DispatchRequest, exclude: &BTreeSet<String>) -> Vec<Candidate> {
        let mut candidates: Vec<Candidate> = self
            .contractors
            .iter()
            .filter(|c| c.availability == Availability::Available && c.verified)
            .filter(|c| !exclude.contains(&c.id))
            .map(|c| Candidate {
                contractor_id: c.id.clone(),
                name: c.name.clone(),
                distance_miles: distance_miles(
                    request.location,
                    GeoPoint {
                        lat: c.lat,
                        lng: c.lng,
                    },
                ),
                rating: c.rating,
            })
            .filter(|c| c.distance_miles <= self.max_distance_miles)
            .collect();

        candidates.sort_by(|a, b| {
            let band_a = (a.distance_miles / RATING_BAND_MILES).floor();
            let band_b = (b.distance_miles / RATING_BAND_MILES).floor();
            band_a
                .total_cmp(&band_b)
                .then(b.rating.total_cmp(&a.rating))
                .then(a.distance_miles.total_cmp(&b.distance_miles))
                .then_with(|| a.contractor_id.cmp(&b.contractor_id))
        });
        candidates
    }
}

#[async_trait]
impl ContractorLocator for RosterLocator {
    async fn next_candidate(
        &self,
        request: &DispatchRequest,
        exclude: &BTreeSet<String>,
    ) -> Result<Option<Candidate>, DispatchError> {
        Ok(self.ranked(request, exclude).into_iter().next())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::Urgency;

    fn profile(id: &str, lat: f64, lng: f64, rating: f64) -> ContractorProfile {
        ContractorProfile {
            id: id.into(),
            name: id.to_uppercase(),
            lat,
            lng,
            rating,
            completed_jobs: 10,
            availability: Availability::Available,
            verified: true,
        }
    }

    fn request_at(lat: f64, lng: f64) -> DispatchRequest {
        DispatchRequest {
            job_id: "job-1".into(),
            location: GeoPoint { lat, lng },
            job_type: "Plumbing".into(),
            estimated_value: 300.0,
            urgency: Urgency::Normal,
        }
    }

    #[test]
    fn haversine_matches_known_distance() {
        // Austin to Dallas is roughly 182 miles as the crow flies.
        let austin = GeoPoint {
            lat: 30.2672,
            lng: -97.7431,
        };
        let dallas = GeoPoint {
            lat: 32.7767,
            lng: -96.7970,
        };
        let d = distance_miles(austin, dallas);
        assert!((d - 182.0).abs() < 3.0, "got {d}");
        assert_eq!(distance_miles(austin, austin), 0.0);
    }

    #[test]
    fn filters_unavailable_unverified_far_and_excluded() {
        let mut busy = profile("busy", 30.0, -97.0, 5.0);
        busy.availability = Availability::Busy;
        let mut unverified = profile("unverified", 30.0, -97.0, 5.0);
        unverified.verified = false;
        let far = profile("far", 40.0, -97.0, 5.0);
        let near = profile("near", 30.01, -97.0, 3.0);
        let excluded = profile("excluded", 30.0, -97.0, 5.0);

        let locator = RosterLocator::new(vec![busy, unverified, far, near, excluded], 50.0);
        let exclude: BTreeSet<String> = ["excluded".to_string()].into();
        let ranked = locator.ranked(&request_at(30.0, -97.0), &exclude);
        let ids: Vec<&str> = ranked.iter().map(|c| c.contractor_id.as_str()).collect();
        assert_eq!(ids, vec!["near"]);
    }

    #[test]
    fn rating_wins_within_same_band_distance_wins_across_bands() {
        // ~0.7 mi, rating 3.0
        let close_low = profile("close_low", 30.01, -97.0, 3.0);
        // ~2.1 mi, rating 4.9
        let close_high = profile("close_high", 30.03, -97.0, 4.9);
        // ~13.8 mi, rating 5.0
        let far_best = profile("far_best", 30.2, -97.0, 5.0);

        let locator = RosterLocator::new(vec![far_best, close_low, close_high], 50.0);
        let ranked = locator.ranked(&request_at(30.0, -97.0), &BTreeSet::new());
        let ids: Vec<&str> = ranked.iter().map(|c| c.contractor_id.as_str()).collect();
        assert_eq!(ids, vec!["close_high", "close_low", "far_best"]);
    }

    #[tokio::test]
    async fn next_candidate_skips_offered() {
        let locator = RosterLocator::new(
            vec![profile("a", 30.0, -97.0, 4.0), profile("b", 30.1, -97.0, 4.0)],
            50.0,
        );
        let request = request_at(30.0, -97.0);
        let first = locator
            .next_candidate(&request, &BTreeSet::new())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.contractor_id, "a");

        let exclude: BTreeSet<String> = ["a".to_string(), "b".to_string()].into();
        assert!(locator.next_candidate(&request, &exclude).await.unwrap().is_none());
    }

    #[test]
    fn load_parses_roster_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("contractors.toml");
        std::fs::write(
            &path,
            r#"
                [[contractors]]
                id = "c-1"
                name = "Ana"
                lat = 30.26
                lng = -97.75
                rating = 4.8
                verified = true

                [[contractors]]
                id = "c-2"
                lat = 30.30
                lng = -97.70
                availability = "offline"
            "#,
        )
        .unwrap();
        let locator = RosterLocator::load(&path, 50.0).unwrap();
        assert_eq!(locator.len(), 2);
        let ranked = locator.ranked(&request_at(30.27, -97.74), &BTreeSet::new());
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].name, "Ana");
    }

    #[test]
    fn missing_roster_is_empty() {
        let locator = RosterLocator::load(Path::new("/definitely/not/here.toml"), 50.0).unwrap();
        assert!(locator.is_empty());
    }
}
