use crate::keyinfo::{KeyInfo, RedisDataType};
use serde::Serialize;
use std::collections::HashSet;

pub const BIG_HASHES: &str = "bigHashes";
pub const BIG_SETS: &str = "bigSets";
pub const BIG_STRINGS: &str = "bigStrings";
pub const COMBINE_SMALL_STRINGS_TO_HASHES: &str = "combineSmallStringsToHashes";
pub const COMPRESS_HASH_FIELD_NAMES: &str = "compressHashFieldNames";
pub const COMPRESSION_FOR_LIST: &str = "compressionForList";
pub const USE_SMALLER_KEYS: &str = "useSmallerKeys";

const BIG_COLLECTION_LENGTH: u64 = 5_000;
const LONG_COLLECTION_LENGTH: u64 = 1_000;
const SMALL_STRING_BYTES: u64 = 200;
const BIG_STRING_BYTES: u64 = 100_000;
const BIG_TOTAL_KEYS: u64 = 1_000_000;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Recommendation {
    pub name: String,
}

impl Recommendation {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Source of recommendations for an analysed key sample.
///
/// One slot per rule; `None` means the rule did not fire.
pub trait RecommendationEngine: Send + Sync {
    fn recommend(&self, keys: &[KeyInfo], total: u64) -> Vec<Option<Recommendation>>;
}

/// Rules decided from key metadata alone
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyRecommendations;

impl KeyRecommendations {
    fn any(keys: &[KeyInfo], key_type: RedisDataType, rule: impl Fn(&KeyInfo) -> bool) -> bool {
        keys.iter()
            .any(|key| key.key_type.as_ref() == Some(&key_type) && rule(key))
    }

    fn length_over(limit: u64) -> impl Fn(&KeyInfo) -> bool {
        move |key| key.length.map_or(false, |length| length > limit)
    }

    fn when(fired: bool, name: &str) -> Option<Recommendation> {
        fired.then(|| Recommendation::new(name))
    }
}

impl RecommendationEngine for KeyRecommendations {
    fn recommend(&self, keys: &[KeyInfo], total: u64) -> Vec<Option<Recommendation>> {
        vec![
            Self::when(
                Self::any(keys, RedisDataType::Hash, Self::length_over(BIG_COLLECTION_LENGTH)),
                BIG_HASHES,
            ),
            Self::when(
                Self::any(keys, RedisDataType::Set, Self::length_over(BIG_COLLECTION_LENGTH)),
                BIG_SETS,
            ),
            Self::when(
                Self::any(keys, RedisDataType::Hash, Self::length_over(LONG_COLLECTION_LENGTH)),
                COMPRESS_HASH_FIELD_NAMES,
            ),
            Self::when(
                Self::any(keys, RedisDataType::List, Self::length_over(LONG_COLLECTION_LENGTH)),
                COMPRESSION_FOR_LIST,
            ),
            Self::when(
                Self::any(keys, RedisDataType::String, |key| {
                    key.memory().map_or(false, |m| m < SMALL_STRING_BYTES)
                }),
                COMBINE_SMALL_STRINGS_TO_HASHES,
            ),
            Self::when(
                Self::any(keys, RedisDataType::String, |key| {
                    key.memory().map_or(false, |m| m > BIG_STRING_BYTES)
                }),
                BIG_STRINGS,
            ),
            Self::when(total > BIG_TOTAL_KEYS, USE_SMALLER_KEYS),
        ]
    }
}

/// Drop rules that did not fire and keep the first of each name
pub fn dedup_recommendations(
    recommendations: impl IntoIterator<Item = Option<Recommendation>>,
) -> Vec<Recommendation> {
    let mut seen = HashSet::new();
    recommendations
        .into_iter()
        .flatten()
        .filter(|r| seen.insert(r.name.clone()))
        .collect()
}
