//! Property tests for the AMM liquidity model (§4.B, invariant P1: a swap
//! never returns more than it was quoted to, and never drains a pool below
//! zero on either side).

use ethers::types::U256;
use proptest::prelude::*;
use xchain_router::amm::{compute_output, SwapQuote};

fn e18(units: u64) -> U256 {
    U256::from(units) * U256::exp10(18)
}

proptest! {
    #[test]
    fn stable_swap_output_never_exceeds_input(
        sending_units in 1_000u64..10_000_000u64,
        receiving_units in 1_000u64..10_000_000u64,
        input_units in 1u64..100_000u64,
        amplification in 1u32..500u32,
    ) {
        let balances = vec![e18(sending_units), e18(receiving_units)];
        let quote = SwapQuote {
            normalized_balances: &balances,
            sending_idx: 0,
            receiving_idx: 1,
            amplification,
            max_price_impact: 1.0,
            allowed_vamm: true,
        };
        if let Ok(output) = compute_output(&quote, e18(input_units)) {
            prop_assert!(output <= balances[1]);
        }
    }

    #[test]
    fn constant_product_output_never_exceeds_pool_balance(
        sending_units in 1_000u64..10_000_000u64,
        receiving_units in 1_000u64..10_000_000u64,
        input_units in 1u64..100_000u64,
    ) {
        let balances = vec![e18(sending_units), e18(receiving_units)];
        let quote = SwapQuote {
            normalized_balances: &balances,
            sending_idx: 0,
            receiving_idx: 1,
            amplification: 0,
            max_price_impact: 1.0,
            allowed_vamm: false,
        };
        if let Ok(output) = compute_output(&quote, e18(input_units)) {
            prop_assert!(output <= balances[1]);
        }
    }

    #[test]
    fn balanced_stable_pool_within_bound_passes_price_impact(
        pool_units in 100_000u64..10_000_000u64,
        input_units in 1u64..1_000u64,
    ) {
        // A small swap (<=1% of a balanced pool) against a well-amplified
        // curve should clear a generous 5% price-impact bound.
        let balances = vec![e18(pool_units), e18(pool_units)];
        let quote = SwapQuote {
            normalized_balances: &balances,
            sending_idx: 0,
            receiving_idx: 1,
            amplification: 200,
            max_price_impact: 0.05,
            allowed_vamm: true,
        };
        prop_assert!(compute_output(&quote, e18(input_units)).is_ok());
    }
}
