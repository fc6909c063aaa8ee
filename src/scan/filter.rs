use crate::keyinfo::{RedisDataType, SizeMode};
use bytes::Bytes;

/// What a scan request is looking for
#[derive(Debug, Clone)]
pub struct ScanFilter {
    /// Glob passed to `SCAN ... MATCH`; `None` matches everything
    pub match_pattern: Option<String>,
    /// Passed to `SCAN ... TYPE`
    pub key_type: Option<RedisDataType>,
    /// Keys wanted per page; `None` or 0 uses the configured default
    pub count: Option<u64>,
    /// Enrich keys with TTL, length and size; otherwise return names only
    pub keys_info: bool,
    pub size_mode: SizeMode,
}

impl Default for ScanFilter {
    fn default() -> Self {
        Self {
            match_pattern: None,
            key_type: None,
            count: None,
            keys_info: true,
            size_mode: SizeMode::Inline,
        }
    }
}

impl ScanFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_match(mut self, pattern: impl Into<String>) -> Self {
        self.match_pattern = Some(pattern.into());
        self
    }

    pub fn with_type(mut self, key_type: RedisDataType) -> Self {
        self.key_type = Some(key_type);
        self
    }

    pub fn with_count(mut self, count: u64) -> Self {
        self.count = Some(count);
        self
    }

    pub fn with_size_mode(mut self, size_mode: SizeMode) -> Self {
        self.size_mode = size_mode;
        self
    }

    /// Return key names (and the filter type) without enrichment
    pub fn names_only(mut self) -> Self {
        self.keys_info = false;
        self
    }

    /// Pattern sent with `MATCH`
    pub fn pattern(&self) -> &str {
        match self.match_pattern.as_deref() {
            Some(pattern) if !pattern.is_empty() => pattern,
            _ => "*",
        }
    }

    /// The single key named by a pattern without glob metacharacters
    pub fn exact_key(&self) -> Option<Bytes> {
        match self.match_pattern.as_deref() {
            Some(pattern) if !pattern.is_empty() && !is_glob_pattern(pattern) => {
                Some(Bytes::from(unescape_glob(pattern)))
            }
            _ => None,
        }
    }
}

/// True if `pattern` contains an unescaped `*`, `?` or `[`
pub fn is_glob_pattern(pattern: &str) -> bool {
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                chars.next();
            }
            '*' | '?' | '[' => return true,
            _ => {}
        }
    }
    false
}

/// Remove glob escapes: `a\*b` becomes `a*b`
pub fn unescape_glob(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len());
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                if let Some(escaped) = chars.next() {
                    out.push(escaped);
                }
            }
            c => out.push(c),
        }
    }
    out
}
