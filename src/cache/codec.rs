//! Cache key derivation and value codec / 缓存键派生与值编解码
//!
//! Keys are a pure function of the filter set: null/empty fields are
//! stripped, remaining keys sorted, JSON-serialized, base64-encoded and
//! namespaced with the source tag. Values above the compression threshold
//! are gzip+base64 with a `compressed:` prefix - spreadsheet-sourced
//! aggregation payloads can be large and store memory/latency matters at
//! scale.

use std::collections::BTreeMap;
use std::io::{Read, Write};

use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use super::CacheError;
use crate::search::{FilterSet, SearchSource};

const KEY_NAMESPACE: &str = "products:search:";
const COMPRESSED_PREFIX: &str = "compressed:";

/// Deterministic cache key for a filter set under one source tag.
/// Permutations of the same non-empty pairs produce identical keys.
pub fn cache_key(filters: &FilterSet, source: SearchSource) -> String {
    let mut fields: BTreeMap<String, String> = BTreeMap::new();
    if let Ok(serde_json::Value::Object(map)) = serde_json::to_value(filters) {
        for (k, v) in map {
            if v.is_null() {
                continue;
            }
            if let Some(s) = v.as_str() {
                if s.is_empty() {
                    continue;
                }
            }
            fields.insert(k, v.to_string());
        }
    }
    let json = serde_json::to_string(&fields).unwrap_or_default();
    format!("{}{}:{}", KEY_NAMESPACE, source.tag(), B64.encode(json))
}

/// Encode a JSON payload for storage; returns `(payload, compressed)`
pub fn encode_value(json: &str, threshold: usize) -> Result<(String, bool), CacheError> {
    if json.len() <= threshold {
        return Ok((json.to_string(), false));
    }
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(json.as_bytes())
        .map_err(|e| CacheError(e.to_string()))?;
    let bytes = encoder.finish().map_err(|e| CacheError(e.to_string()))?;
    Ok((format!("{}{}", COMPRESSED_PREFIX, B64.encode(bytes)), true))
}

/// Decode a stored payload back to its JSON form
pub fn decode_value(payload: &str) -> Result<String, CacheError> {
    match payload.strip_prefix(COMPRESSED_PREFIX) {
        None => Ok(payload.to_string()),
        Some(b64) => {
            let bytes = B64.decode(b64).map_err(|e| CacheError(e.to_string()))?;
            let mut json = String::new();
            GzDecoder::new(bytes.as_slice())
                .read_to_string(&mut json)
                .map_err(|e| CacheError(e.to_string()))?;
            Ok(json)
        }
    }
}
