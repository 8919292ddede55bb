//! Tiered resolution of platform artist ids into unified artist identities.
//!
//! Tiers run in a fixed order and the first one producing a match wins:
//! cache, ISRC, direct platform id, fuzzy name, track name, create. Every
//! outcome except a direct platform id hit is written to the match cache, so a
//! platform artist id resolves through the cache from its second sighting on.

use super::normalize::{normalize_name, trigram_similarity};
use crate::listening_store::{
    ListeningStore, MatchConfidence, MatchMethod, Platform, PlatformIds, UnifiedArtist,
};
use crate::server::metrics;
use anyhow::Result;
use std::sync::Arc;
use tracing::{debug, warn};

/// Minimum similarity for a fuzzy name match, exclusive.
pub const FUZZY_MATCH_THRESHOLD: f64 = 0.85;
const FUZZY_HIGH_CONFIDENCE: f64 = 0.95;
const FUZZY_MEDIUM_CONFIDENCE: f64 = 0.90;
/// Looser name similarity required by the track-name fallback, inclusive.
pub const TRACK_FALLBACK_NAME_THRESHOLD: f64 = 0.6;

/// Everything the resolver knows about the artist of one play.
#[derive(Debug, Clone, Copy)]
pub struct ResolveRequest<'a> {
    pub platform: Platform,
    pub platform_artist_id: &'a str,
    pub artist_name: &'a str,
    pub isrc: Option<&'a str>,
    pub track_name: Option<&'a str>,
}

/// Which step produced a resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionTier {
    Cache,
    Isrc,
    DirectIdentity,
    FuzzyName,
    TrackName,
    Created,
    /// Resolution failed internally and the platform id is used as identity.
    Degraded,
}

impl ResolutionTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionTier::Cache => "cache",
            ResolutionTier::Isrc => "isrc",
            ResolutionTier::DirectIdentity => "direct",
            ResolutionTier::FuzzyName => "name_fuzzy",
            ResolutionTier::TrackName => "track_name",
            ResolutionTier::Created => "created",
            ResolutionTier::Degraded => "degraded",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub unified_artist_id: String,
    pub tier: ResolutionTier,
}

/// A match produced by one of the matching tiers, not yet bound or cached.
#[derive(Debug, Clone, PartialEq)]
pub struct ArtistMatch {
    pub unified_id: String,
    pub confidence: MatchConfidence,
    pub method: MatchMethod,
}

fn fuzzy_confidence(similarity: f64) -> MatchConfidence {
    if similarity >= FUZZY_HIGH_CONFIDENCE {
        MatchConfidence::High
    } else if similarity >= FUZZY_MEDIUM_CONFIDENCE {
        MatchConfidence::Medium
    } else {
        MatchConfidence::Low
    }
}

/// Unified id given to an artist first seen on `platform`. Ids from the primary
/// platform are used as they are, others are namespaced so they can never
/// collide with a primary platform id.
pub fn new_unified_id(platform: Platform, primary: Platform, platform_artist_id: &str) -> String {
    if platform == primary {
        platform_artist_id.to_string()
    } else {
        format!("{}:{}", platform.as_str(), platform_artist_id)
    }
}

pub struct IdentityResolver {
    store: Arc<dyn ListeningStore>,
    primary_platform: Platform,
}

impl IdentityResolver {
    pub fn new(store: Arc<dyn ListeningStore>, primary_platform: Platform) -> Self {
        Self {
            store,
            primary_platform,
        }
    }

    /// Resolves the unified artist id of a play. Never fails: on internal
    /// errors the platform artist id itself is returned as identity.
    pub fn resolve(&self, request: &ResolveRequest) -> Resolution {
        let resolution = match self.try_resolve(request) {
            Ok(resolution) => resolution,
            Err(e) => {
                warn!(
                    "Identity resolution failed for {} artist {}, falling back to platform id: {:#}",
                    request.platform, request.platform_artist_id, e
                );
                Resolution {
                    unified_artist_id: request.platform_artist_id.to_string(),
                    tier: ResolutionTier::Degraded,
                }
            }
        };
        metrics::record_identity_resolution(resolution.tier.as_str());
        resolution
    }

    pub fn try_resolve(&self, request: &ResolveRequest) -> Result<Resolution> {
        if let Some(unified_artist_id) = self.lookup_cache(request)? {
            return Ok(Resolution {
                unified_artist_id,
                tier: ResolutionTier::Cache,
            });
        }

        let normalized = normalize_name(request.artist_name);

        if let Some(found) = self.match_isrc(request)? {
            return self.bind(request, &normalized, found, ResolutionTier::Isrc);
        }

        if let Some(unified_artist_id) = self.match_direct_identity(request)? {
            return Ok(Resolution {
                unified_artist_id,
                tier: ResolutionTier::DirectIdentity,
            });
        }

        if let Some(found) = self.match_fuzzy_name(&normalized)? {
            return self.bind(request, &normalized, found, ResolutionTier::FuzzyName);
        }

        if let Some(found) = self.match_track_name(request, &normalized)? {
            return self.bind(request, &normalized, found, ResolutionTier::TrackName);
        }

        self.create(request, &normalized)
    }

    fn lookup_cache(&self, request: &ResolveRequest) -> Result<Option<String>> {
        self.store
            .get_cached_match(request.platform, request.platform_artist_id)
    }

    fn match_isrc(&self, request: &ResolveRequest) -> Result<Option<ArtistMatch>> {
        let Some(isrc) = request.isrc.filter(|s| !s.trim().is_empty()) else {
            return Ok(None);
        };
        Ok(self.store.find_artist_by_isrc(isrc)?.map(|artist| ArtistMatch {
            unified_id: artist.unified_id,
            confidence: MatchConfidence::High,
            method: MatchMethod::Isrc,
        }))
    }

    fn match_direct_identity(&self, request: &ResolveRequest) -> Result<Option<String>> {
        Ok(self
            .store
            .find_artist_by_platform_id(request.platform, request.platform_artist_id)?
            .map(|artist| artist.unified_id))
    }

    /// Best scoring known artist above the fuzzy threshold. Ties keep the
    /// earliest created artist.
    fn match_fuzzy_name(&self, normalized: &str) -> Result<Option<ArtistMatch>> {
        if normalized.is_empty() {
            return Ok(None);
        }
        let mut best: Option<(String, f64)> = None;
        for (unified_id, candidate) in self.store.list_artist_names()? {
            let similarity = trigram_similarity(normalized, &candidate);
            if similarity > FUZZY_MATCH_THRESHOLD
                && best.as_ref().map_or(true, |(_, s)| similarity > *s)
            {
                best = Some((unified_id, similarity));
            }
        }
        Ok(best.map(|(unified_id, similarity)| {
            debug!(
                "Fuzzy matched '{}' to {} with similarity {:.3}",
                normalized, unified_id, similarity
            );
            ArtistMatch {
                unified_id,
                confidence: fuzzy_confidence(similarity),
                method: MatchMethod::NameFuzzy,
            }
        }))
    }

    /// Artist with a loosely similar name that already has a play of the same
    /// (normalized) track.
    fn match_track_name(
        &self,
        request: &ResolveRequest,
        normalized: &str,
    ) -> Result<Option<ArtistMatch>> {
        let Some(track) = request.track_name.map(normalize_name).filter(|t| !t.is_empty()) else {
            return Ok(None);
        };
        for (unified_id, candidate) in self.store.list_artist_names()? {
            if trigram_similarity(normalized, &candidate) < TRACK_FALLBACK_NAME_THRESHOLD {
                continue;
            }
            if self.store.artist_has_track(&unified_id, &track)? {
                return Ok(Some(ArtistMatch {
                    unified_id,
                    confidence: MatchConfidence::Medium,
                    method: MatchMethod::TrackName,
                }));
            }
        }
        Ok(None)
    }

    fn incoming_artist(&self, unified_id: &str, request: &ResolveRequest, normalized: &str) -> UnifiedArtist {
        UnifiedArtist {
            unified_id: unified_id.to_string(),
            canonical_name: request.artist_name.trim().to_string(),
            normalized_name: normalized.to_string(),
            isrc: request.isrc.map(str::to_string).filter(|s| !s.trim().is_empty()),
            platform_ids: PlatformIds::for_platform(request.platform, request.platform_artist_id),
            total_catalog_track_count: None,
            catalog_updated_at: None,
        }
    }

    /// Attaches the platform id to the matched artist and caches the match.
    /// The cache is write-once, so the id it reports back is the one returned.
    fn bind(
        &self,
        request: &ResolveRequest,
        normalized: &str,
        found: ArtistMatch,
        tier: ResolutionTier,
    ) -> Result<Resolution> {
        self.store
            .upsert_artist(&self.incoming_artist(&found.unified_id, request, normalized))?;
        let unified_artist_id = self.store.cache_match(
            request.platform,
            request.platform_artist_id,
            &found.unified_id,
            found.confidence,
            found.method,
        )?;
        Ok(Resolution {
            unified_artist_id,
            tier,
        })
    }

    fn create(&self, request: &ResolveRequest, normalized: &str) -> Result<Resolution> {
        let unified_id = new_unified_id(
            request.platform,
            self.primary_platform,
            request.platform_artist_id,
        );
        // A concurrent creation of the same id is merged, not overwritten.
        let stored = self
            .store
            .upsert_artist(&self.incoming_artist(&unified_id, request, normalized))?;
        let unified_artist_id = self.store.cache_match(
            request.platform,
            request.platform_artist_id,
            &stored.unified_id,
            MatchConfidence::High,
            MatchMethod::Created,
        )?;
        debug!(
            "Created unified artist {} for {} artist {}",
            unified_artist_id, request.platform, request.platform_artist_id
        );
        Ok(Resolution {
            unified_artist_id,
            tier: ResolutionTier::Created,
        })
    }
}
