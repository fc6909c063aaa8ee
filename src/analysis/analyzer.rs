use crate::keyinfo::{serialize_name, KeyInfo};
use bytes::Bytes;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashMap;

/// Entries kept in each top-N list
pub const TOP_LIMIT: usize = 15;

/// TTL buckets as (label, exclusive upper bound in seconds). The first
/// bucket collects keys without expiry.
pub const EXPIRATION_GROUPS: [(&str, u64); 8] = [
    ("No Expiry", 0),
    ("<1 hr", 3_600),
    ("1-4 Hrs", 14_400),
    ("4-12 Hrs", 43_200),
    ("12-24 Hrs", 86_400),
    ("1-7 Days", 604_800),
    (">7 Days", 2_592_000),
    (">1 Month", 9_007_199_254_740_991),
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TypeTotal {
    #[serde(rename = "type")]
    pub key_type: String,
    pub total: u64,
}

/// A total and its split by key type, largest type first
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SimpleSummary {
    pub total: u64,
    pub types: Vec<TypeTotal>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NamespaceType {
    #[serde(rename = "type")]
    pub key_type: String,
    pub keys: u64,
    pub memory: u64,
}

/// Keys sharing the prefix before the first delimiter
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NamespaceSummary {
    #[serde(serialize_with = "serialize_name")]
    pub nsp: Bytes,
    pub keys: u64,
    pub memory: u64,
    pub types: Vec<NamespaceType>,
}

impl NamespaceSummary {
    fn new(nsp: Bytes) -> Self {
        Self {
            nsp,
            keys: 0,
            memory: 0,
            types: Vec::new(),
        }
    }

    fn add(&mut self, key: &KeyInfo) {
        let memory = key.memory().unwrap_or(0);
        self.keys += 1;
        self.memory += memory;

        let Some(key_type) = &key.key_type else {
            return;
        };
        match self
            .types
            .iter_mut()
            .find(|entry| entry.key_type == key_type.as_str())
        {
            Some(entry) => {
                entry.keys += 1;
                entry.memory += memory;
            }
            None => self.types.push(NamespaceType {
                key_type: key_type.to_string(),
                keys: 1,
                memory,
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExpirationGroup {
    pub label: &'static str,
    pub threshold: u64,
    /// Memory of the keys in this bucket
    pub total: u64,
}

/// Summary of a sample of keys
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseAnalysis {
    pub delimiter: String,
    pub total_keys: SimpleSummary,
    pub total_memory: SimpleSummary,
    pub top_keys_memory: Vec<KeyInfo>,
    pub top_keys_length: Vec<KeyInfo>,
    pub top_keys_nsp: Vec<NamespaceSummary>,
    pub top_memory_nsp: Vec<NamespaceSummary>,
    pub expiration_groups: Vec<ExpirationGroup>,
}

/// Stateless summariser over enriched keys
#[derive(Debug, Clone, Copy, Default)]
pub struct DatabaseAnalyzer;

impl DatabaseAnalyzer {
    pub fn new() -> Self {
        Self
    }

    pub fn analyze(&self, keys: &[KeyInfo], delimiter: &str) -> DatabaseAnalysis {
        let namespaces = self.namespaces(keys, delimiter);

        let mut top_keys_nsp = namespaces.clone();
        top_keys_nsp.sort_by(|a, b| b.keys.cmp(&a.keys).then(b.memory.cmp(&a.memory)));
        top_keys_nsp.truncate(TOP_LIMIT);

        let mut top_memory_nsp = namespaces;
        top_memory_nsp.sort_by(|a, b| b.memory.cmp(&a.memory).then(b.keys.cmp(&a.keys)));
        top_memory_nsp.truncate(TOP_LIMIT);

        DatabaseAnalysis {
            delimiter: delimiter.to_string(),
            total_keys: self.summarize(keys, |_| 1),
            total_memory: self.summarize(keys, |key| key.memory().unwrap_or(0)),
            top_keys_memory: self.top_keys(keys, KeyInfo::memory),
            top_keys_length: self.top_keys(keys, |key| key.length),
            top_keys_nsp,
            top_memory_nsp,
            expiration_groups: self.expiration_groups(keys),
        }
    }

    /// Sum `measure` over all keys and per type. Keys without a type count
    /// toward the total only.
    pub fn summarize<F>(&self, keys: &[KeyInfo], measure: F) -> SimpleSummary
    where
        F: Fn(&KeyInfo) -> u64,
    {
        let mut summary = SimpleSummary::default();
        let mut index: HashMap<&str, usize> = HashMap::new();

        for key in keys {
            let value = measure(key);
            summary.total += value;

            let Some(key_type) = &key.key_type else {
                continue;
            };
            match index.get(key_type.as_str()) {
                Some(&i) => summary.types[i].total += value,
                None => {
                    index.insert(key_type.as_str(), summary.types.len());
                    summary.types.push(TypeTotal {
                        key_type: key_type.to_string(),
                        total: value,
                    });
                }
            }
        }

        summary.types.sort_by(|a, b| b.total.cmp(&a.total));
        summary
    }

    /// Largest keys by `measure`; keys without a value go last
    pub fn top_keys<F>(&self, keys: &[KeyInfo], measure: F) -> Vec<KeyInfo>
    where
        F: Fn(&KeyInfo) -> Option<u64>,
    {
        let mut ranked: Vec<&KeyInfo> = keys.iter().collect();
        ranked.sort_by(|a, b| match (measure(a), measure(b)) {
            (Some(x), Some(y)) => y.cmp(&x),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        });
        ranked.into_iter().take(TOP_LIMIT).cloned().collect()
    }

    /// Namespaces in order of first appearance
    pub fn namespaces(&self, keys: &[KeyInfo], delimiter: &str) -> Vec<NamespaceSummary> {
        let mut namespaces: Vec<NamespaceSummary> = Vec::new();
        let mut index: HashMap<Bytes, usize> = HashMap::new();

        for key in keys {
            let Some(nsp) = namespace_of(&key.name, delimiter.as_bytes()) else {
                continue;
            };
            let i = *index.entry(nsp.clone()).or_insert_with(|| {
                namespaces.push(NamespaceSummary::new(nsp));
                namespaces.len() - 1
            });
            namespaces[i].add(key);
        }
        namespaces
    }

    pub fn expiration_groups(&self, keys: &[KeyInfo]) -> Vec<ExpirationGroup> {
        let mut groups: Vec<ExpirationGroup> = EXPIRATION_GROUPS
            .iter()
            .map(|&(label, threshold)| ExpirationGroup {
                label,
                threshold,
                total: 0,
            })
            .collect();

        for key in keys {
            let Some(ttl) = key.ttl else {
                continue;
            };
            let bucket = if ttl < 0 {
                Some(0)
            } else {
                EXPIRATION_GROUPS
                    .iter()
                    .skip(1)
                    .position(|&(_, threshold)| (ttl as u64) < threshold)
                    .map(|i| i + 1)
            };
            if let Some(i) = bucket {
                groups[i].total += key.memory().unwrap_or(0);
            }
        }
        groups
    }
}

/// Prefix of `name` before the first `delimiter`; empty prefixes are not
/// namespaces
fn namespace_of(name: &Bytes, delimiter: &[u8]) -> Option<Bytes> {
    if delimiter.is_empty() || name.len() < delimiter.len() {
        return None;
    }
    match name.windows(delimiter.len()).position(|w| w == delimiter) {
        Some(0) | None => None,
        Some(end) => Some(name.slice(..end)),
    }
}
