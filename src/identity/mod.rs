mod normalize;
mod resolver;

pub use normalize::{normalize_name, trigram_similarity};
pub use resolver::{
    new_unified_id, ArtistMatch, IdentityResolver, Resolution, ResolutionTier, ResolveRequest,
    FUZZY_MATCH_THRESHOLD, TRACK_FALLBACK_NAME_THRESHOLD,
};
