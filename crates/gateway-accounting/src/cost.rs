use gateway_protocol::openai::models::Pricing;

/// How a request ended, for the purposes of billing. Distinct from the
/// router's attempt state machine; this is the final, request-scoped
/// outcome accounting needs to decide whether to charge at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    Success,
    /// Stream was forwarding chunks when the caller disconnected. The
    /// tokens produced so far are still billed.
    PartialStream,
    /// Ended `Fatal` before any billable upstream tokens existed. Cost is
    /// forced to zero regardless of the catalog's flat request price.
    FatalNoTokens,
}

/// `cost = prompt_tokens * prompt_price + completion_tokens * completion_price
/// + request_price`, from the catalog entry of the gateway that served the
/// request. Prices are normalized to `"0"` at catalog-fetch time when a
/// provider doesn't report them, so an all-zero pricing triple is the
/// representation for "unknown" here and cost_unknown is derived from that
/// rather than from an explicit null.
pub fn calculate_cost(
    prompt_tokens: i64,
    completion_tokens: i64,
    pricing: &Pricing,
    outcome: RequestOutcome,
) -> (i64, bool) {
    if outcome == RequestOutcome::FatalNoTokens {
        return (0, false);
    }

    let prompt_price = parse_price(&pricing.prompt);
    let completion_price = parse_price(&pricing.completion);
    let request_price = parse_price(&pricing.request);

    if prompt_price == 0.0 && completion_price == 0.0 && request_price == 0.0 {
        return (0, true);
    }

    let usd = prompt_tokens as f64 * prompt_price
        + completion_tokens as f64 * completion_price
        + request_price;
    ((usd * 100.0).round() as i64, false)
}

fn parse_price(raw: &str) -> f64 {
    raw.parse().unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pricing(prompt: &str, completion: &str, request: &str) -> Pricing {
        Pricing {
            prompt: prompt.to_string(),
            completion: completion.to_string(),
            request: request.to_string(),
        }
    }

    #[test]
    fn computes_cost_in_cents_from_token_counts() {
        // $0.00002/prompt-token, $0.00006/completion-token, no flat fee.
        let pricing = pricing("0.00002", "0.00006", "0");
        let (cost, cost_unknown) = calculate_cost(1000, 500, &pricing, RequestOutcome::Success);
        // 1000*0.00002 + 500*0.00006 = 0.02 + 0.03 = $0.05 = 5 cents.
        assert_eq!(cost, 5);
        assert!(!cost_unknown);
    }

    #[test]
    fn all_zero_pricing_is_flagged_unknown() {
        let pricing = pricing("0", "0", "0");
        let (cost, cost_unknown) = calculate_cost(1000, 500, &pricing, RequestOutcome::Success);
        assert_eq!(cost, 0);
        assert!(cost_unknown);
    }

    #[test]
    fn fatal_without_tokens_is_always_zero_cost() {
        let pricing = pricing("0.01", "0.01", "0.50");
        let (cost, cost_unknown) = calculate_cost(0, 0, &pricing, RequestOutcome::FatalNoTokens);
        assert_eq!(cost, 0);
        assert!(!cost_unknown);
    }

    #[test]
    fn partial_stream_bills_produced_tokens_only() {
        let pricing = pricing("0.00002", "0.00006", "0");
        let (cost, _) = calculate_cost(100, 50, &pricing, RequestOutcome::PartialStream);
        // 100*0.00002 + 50*0.00006 = 0.002 + 0.003 = $0.005, rounds to 1 cent.
        assert_eq!(cost, 1);
    }
}
