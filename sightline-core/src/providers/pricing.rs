use crate::models::ProviderId;

/// USD per 1K tokens.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TokenPrice {
    pub input_per_1k: f64,
    pub output_per_1k: f64,
}

pub const fn price_for(provider: ProviderId) -> TokenPrice {
    match provider {
        ProviderId::OpenAi => TokenPrice {
            input_per_1k: 0.15,
            output_per_1k: 0.60,
        },
        ProviderId::Anthropic => TokenPrice {
            input_per_1k: 3.00,
            output_per_1k: 15.00,
        },
        ProviderId::Gemini => TokenPrice {
            input_per_1k: 0.075,
            output_per_1k: 0.30,
        },
    }
}

/// Estimated cost in USD, rounded to 6 decimals. Missing counts cost nothing.
pub fn estimate_cost_usd(provider: ProviderId, tokens_in: Option<i32>, tokens_out: Option<i32>) -> f64 {
    let price = price_for(provider);
    let input = tokens_in.unwrap_or(0).max(0) as f64 / 1000.0 * price.input_per_1k;
    let output = tokens_out.unwrap_or(0).max(0) as f64 / 1000.0 * price.output_per_1k;
    ((input + output) * 1_000_000.0).round() / 1_000_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openai_cost() {
        let cost = estimate_cost_usd(ProviderId::OpenAi, Some(1000), Some(500));
        assert!((cost - 0.45).abs() < 1e-9);
    }

    #[test]
    fn test_missing_tokens_cost_zero() {
        assert_eq!(estimate_cost_usd(ProviderId::Anthropic, None, None), 0.0);
    }

    #[test]
    fn test_rounds_to_six_decimals() {
        let cost = estimate_cost_usd(ProviderId::Gemini, Some(7), Some(3));
        // 7 * 0.000075 + 3 * 0.0003 = 0.001425
        assert!((cost - 0.001425).abs() < 1e-12);
    }
}
