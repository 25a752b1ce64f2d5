use serde_json::Value;

/// Extract JSON from text that may be wrapped in markdown code fences or
/// surrounded by prose.
pub(crate) fn extract_json(text: &str) -> &str {
    let trimmed = text.trim();
    if let Some(start) = trimmed.find("```json") {
        let after_fence = &trimmed[start + 7..];
        if let Some(end) = after_fence.find("```") {
            return after_fence[..end].trim();
        }
    }
    if let Some(start) = trimmed.find("```") {
        let after_fence = &trimmed[start + 3..];
        if let Some(end) = after_fence.find("```") {
            return after_fence[..end].trim();
        }
    }
    match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if start < end => &trimmed[start..=end],
        _ => trimmed,
    }
}

/// Deserialize each element independently, collecting a warning for every
/// element that fails instead of rejecting the whole array.
pub(crate) fn parse_lenient<T: serde::de::DeserializeOwned>(raw: &[Value]) -> (Vec<T>, Vec<String>) {
    let mut items = Vec::new();
    let mut warnings = Vec::new();
    for (i, val) in raw.iter().enumerate() {
        match serde_json::from_value::<T>(val.clone()) {
            Ok(item) => items.push(item),
            Err(e) => {
                let label = val
                    .get("id")
                    .and_then(|v| v.as_str())
                    .map(String::from)
                    .unwrap_or_else(|| format!("#{}", i));
                warnings.push(format!("'{}' skipped (malformed): {}", label, e));
            }
        }
    }
    (items, warnings)
}
