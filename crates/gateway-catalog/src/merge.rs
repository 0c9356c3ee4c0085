use std::collections::HashMap;

use gateway_protocol::openai::models::{ModelEntry, Pricing};

/// `GetAll`'s precedence key: a Portkey entry wraps its sub-provider's model
/// id as `portkey/@sub/model`; unwrapping it to `sub/model` lets it collide
/// with (and lose to) the same model surfaced directly by its own adapter,
/// per the documented "explicit per-gateway id beats aggregated-via-portkey
/// id" rule. Every other entry's id is already its merge key.
fn canonical_merge_key(entry: &ModelEntry) -> String {
    if entry.source_gateway == "portkey"
        && let Some(wrapped) = entry.id.strip_prefix("portkey/@")
        && let Some((sub, rest)) = wrapped.split_once('/')
    {
        return format!("{sub}/{rest}");
    }
    entry.id.clone()
}

fn pricing_is_unset(pricing: &Pricing) -> bool {
    pricing.prompt == "0" && pricing.completion == "0" && pricing.request == "0"
}

/// Merges per-gateway snapshots into one list, in `gateway_order` priority:
/// the first gateway to claim a canonical id wins that entry outright,
/// except a later gateway may backfill pricing into an entry whose pricing
/// is still the unset `"0"` fallback.
pub fn merge_entries<'a>(
    gateway_order: &[String],
    per_gateway: impl Fn(&str) -> Option<&'a [ModelEntry]>,
) -> Vec<ModelEntry> {
    let mut merged: HashMap<String, ModelEntry> = HashMap::new();
    let mut order: Vec<String> = Vec::new();

    for gateway in gateway_order {
        let Some(entries) = per_gateway(gateway) else {
            continue;
        };
        for entry in entries {
            let key = canonical_merge_key(entry);
            match merged.get_mut(&key) {
                None => {
                    order.push(key.clone());
                    merged.insert(key, entry.clone());
                }
                Some(existing) => {
                    if pricing_is_unset(&existing.pricing) && !pricing_is_unset(&entry.pricing) {
                        existing.pricing = entry.pricing.clone();
                    }
                }
            }
        }
    }

    order
        .into_iter()
        .filter_map(|key| merged.remove(&key))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(gateway: &str, id: &str, pricing: Pricing) -> ModelEntry {
        ModelEntry {
            id: id.to_string(),
            object: "model".to_string(),
            source_gateway: gateway.to_string(),
            display_name: id.to_string(),
            context_length: None,
            pricing,
            modality: Default::default(),
            huggingface: None,
            raw_upstream: None,
        }
    }

    #[test]
    fn direct_provider_wins_over_portkey_aggregation() {
        let direct = vec![entry("deepinfra", "deepinfra/meta-llama/x", Pricing::default())];
        let portkey = vec![entry(
            "portkey",
            "portkey/@deepinfra/meta-llama/x",
            Pricing {
                prompt: "0.0001".to_string(),
                completion: "0.0002".to_string(),
                request: "0".to_string(),
            },
        )];
        let order = vec!["deepinfra".to_string(), "portkey".to_string()];
        let by_gateway = |g: &str| -> Option<&[ModelEntry]> {
            match g {
                "deepinfra" => Some(&direct),
                "portkey" => Some(&portkey),
                _ => None,
            }
        };
        let merged = merge_entries(&order, by_gateway);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].source_gateway, "deepinfra");
        // direct entry's pricing was unset, so portkey backfills it.
        assert_eq!(merged[0].pricing.prompt, "0.0001");
    }

    #[test]
    fn earlier_non_null_pricing_is_not_overwritten() {
        let first = vec![entry(
            "openrouter",
            "openrouter/meta-llama/x",
            Pricing {
                prompt: "0.0005".to_string(),
                completion: "0.0006".to_string(),
                request: "0".to_string(),
            },
        )];
        let second = vec![entry(
            "portkey",
            "portkey/@openrouter/meta-llama/x",
            Pricing {
                prompt: "0.0009".to_string(),
                completion: "0.0009".to_string(),
                request: "0".to_string(),
            },
        )];
        let order = vec!["openrouter".to_string(), "portkey".to_string()];
        let by_gateway = |g: &str| -> Option<&[ModelEntry]> {
            match g {
                "openrouter" => Some(&first),
                "portkey" => Some(&second),
                _ => None,
            }
        };
        let merged = merge_entries(&order, by_gateway);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].pricing.prompt, "0.0005");
    }
}
