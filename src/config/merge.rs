//! Configuration merge logic
//!
//! - Objects: deep-merge by key
//! - Arrays: REPLACE (last wins)
//! - Scalars: override (last wins)

use serde_json::Value;

/// Deep merge two JSON values.
///
/// Objects merge recursively; arrays, scalars and null in `overlay` replace
/// whatever `base` held.
pub fn deep_merge(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(mut base_map), Value::Object(overlay_map)) => {
            for (key, overlay_value) in overlay_map {
                let merged = match base_map.remove(&key) {
                    Some(base_value) => deep_merge(base_value, overlay_value),
                    None => overlay_value,
                };
                base_map.insert(key, merged);
            }
            Value::Object(base_map)
        }

        // Scalars, arrays and mismatched kinds: overlay wins
        (_, overlay) => overlay,
    }
}

/// Merge layers in order (first is base, last has highest precedence)
pub fn merge_layers(layers: Vec<Value>) -> Value {
    layers.into_iter().fold(Value::Null, deep_merge)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_scalar_override() {
        let result = deep_merge(
            json!({"repo_url": "http://localhost:8080/repo"}),
            json!({"repo_url": "https://apps.example.org/repo"}),
        );
        assert_eq!(result["repo_url"], "https://apps.example.org/repo");
    }

    #[test]
    fn test_object_deep_merge() {
        let base = json!({
            "timeouts": {
                "build_seconds": 1800,
                "mirror_seconds": 900
            }
        });
        let overlay = json!({
            "timeouts": {
                "build_seconds": 600
            }
        });
        let result = deep_merge(base, overlay);

        assert_eq!(result["timeouts"]["build_seconds"], 600);
        assert_eq!(result["timeouts"]["mirror_seconds"], 900);
    }

    #[test]
    fn test_array_replace() {
        let base = json!({
            "mirrors": [{"name": "http"}, {"name": "cdn"}]
        });
        let overlay = json!({
            "mirrors": [{"name": "only"}]
        });
        let result = deep_merge(base, overlay);

        let mirrors = result["mirrors"].as_array().unwrap();
        assert_eq!(mirrors.len(), 1);
        assert_eq!(mirrors[0]["name"], "only");
    }

    #[test]
    fn test_null_override() {
        let result = deep_merge(json!({"bucket": {"name": "b"}}), json!({"bucket": null}));
        assert!(result["bucket"].is_null());
    }

    #[test]
    fn test_merge_layers() {
        let builtin = json!({"repo_name": "builtin", "publish": {"retries": 1}});
        let file = json!({"repo_name": "file"});
        let env = json!({"publish": {"retries": 3}});
        let cli = json!({"repo_name": "cli"});

        let result = merge_layers(vec![builtin, file, env, cli]);

        assert_eq!(result["repo_name"], "cli");
        assert_eq!(result["publish"]["retries"], 3);
    }
}
