/// Store key layout for autosave records.
///
/// ```text
/// {prefix}{logical_key}     → JSON StoredRecord
/// __draftcache_probe__      → availability probe, removed right after writing
/// ```
///
/// The prefix is configurable (default `"autosave:"`), so external tooling
/// can list every record with a plain prefix scan of the store.

/// Key used by the availability probe. Lives outside any record prefix.
pub const PROBE_KEY: &str = "__draftcache_probe__";

/// Store key for a logical key. Format: "{prefix}{key}"
pub fn record_key(prefix: &str, key: &str) -> String {
    format!("{prefix}{key}")
}

/// Logical key for a store key, or `None` if it is not a record key.
pub fn logical_key<'a>(prefix: &str, store_key: &'a str) -> Option<&'a str> {
    store_key.strip_prefix(prefix)
}
