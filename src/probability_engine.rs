//! Turns a `(Forecast, bins, metric, maxSoFar?)` into a probability map and
//! classifies edges using a closed-form normal approximation rather than a
//! model call, so fair-value estimation never depends on an external API.

use crate::domain::{Bin, BinProbability, Metric, Side};

const CONTINUITY_CORRECTION: f64 = 0.5;

/// Standard normal CDF, Abramowitz & Stegun approximation 7.1.26.
/// Target absolute error < 1e-5 over the practical range; exact in the
/// limit as |x| -> infinity.
pub fn normal_cdf(x: f64) -> f64 {
    if x >= 0.0 {
        1.0 - 0.5 * erfc_approx(x / std::f64::consts::SQRT_2)
    } else {
        0.5 * erfc_approx(-x / std::f64::consts::SQRT_2)
    }
}

/// Complementary error function approximation (Abramowitz & Stegun 7.1.26),
/// valid for x >= 0.
fn erfc_approx(x: f64) -> f64 {
    const A1: f64 = 0.254829592;
    const A2: f64 = -0.284496736;
    const A3: f64 = 1.421413741;
    const A4: f64 = -1.453152027;
    const A5: f64 = 1.061405429;
    const P: f64 = 0.3275911;

    let t = 1.0 / (1.0 + P * x);
    let poly = ((((A5 * t + A4) * t + A3) * t + A2) * t + A1) * t;
    poly * (-x * x).exp()
}

/// Per-bin probability with continuity correction delta = 0.5, bins being
/// integer-edged.
pub fn bin_probability(bin: &Bin, mu: f64, sigma: f64) -> f64 {
    let delta = CONTINUITY_CORRECTION;
    let p = if bin.is_floor {
        let u = bin.upper.expect("floor bin has upper bound");
        normal_cdf((u + delta - mu) / sigma)
    } else if bin.is_ceiling {
        let l = bin.lower.expect("ceiling bin has lower bound");
        1.0 - normal_cdf((l - delta - mu) / sigma)
    } else {
        let l = bin.lower.expect("range bin has lower bound");
        let u = bin.upper.expect("range bin has upper bound");
        normal_cdf((u + delta - mu) / sigma) - normal_cdf((l - delta - mu) / sigma)
    };
    p.clamp(0.0, 1.0)
}

/// Day-of conditioning: bins wholly dominated by `max_so_far` are
/// impossible; surviving range/ceiling bins have their lower bound raised
/// to `max(lower, max_so_far)` before evaluation. Only applies to
/// DAILY_MAX_TEMP when `max_so_far` is supplied.
fn conditioned_bin(bin: &Bin, max_so_far: Option<f64>, metric: Metric) -> (Bin, bool) {
    let Some(floor) = max_so_far.filter(|_| metric == Metric::DailyMaxTemp) else {
        return (bin.clone(), true);
    };

    let dominated_upper_bound = bin.upper;
    if let Some(upper) = dominated_upper_bound {
        if floor > upper {
            return (bin.clone(), false);
        }
    }

    let mut adjusted = bin.clone();
    if !bin.is_floor {
        let new_lower = match bin.lower {
            Some(l) => l.max(floor),
            None => floor,
        };
        adjusted.lower = Some(new_lower);
    } else {
        // A floor bin is only "wholly dominated" (and thus impossible) when
        // its upper bound is strictly below max_so_far; handled above.
    }
    (adjusted, true)
}

/// Compute fair probabilities for every bin of a market, applying
/// continuity correction and (when applicable) day-of conditioning with
/// renormalization. Rainfall/snowfall metrics are not priceable: returns a
/// uniform distribution, never to be treated as actionable.
pub fn compute_bin_probabilities(
    bins: &[Bin],
    metric: Metric,
    mu: Option<f64>,
    sigma: f64,
    max_so_far: Option<f64>,
) -> Vec<(String, f64, bool)> {
    if bins.is_empty() {
        return Vec::new();
    }

    if !metric.is_priceable() {
        let uniform = 1.0 / bins.len() as f64;
        return bins
            .iter()
            .map(|b| (b.outcome_id.clone(), uniform, true))
            .collect();
    }

    let Some(mu) = mu else {
        let uniform = 1.0 / bins.len() as f64;
        return bins
            .iter()
            .map(|b| (b.outcome_id.clone(), uniform, true))
            .collect();
    };

    let conditioned: Vec<(String, Option<f64>, bool)> = bins
        .iter()
        .map(|b| {
            let (adjusted, possible) = conditioned_bin(b, max_so_far, metric);
            if !possible {
                (b.outcome_id.clone(), None, false)
            } else {
                (
                    b.outcome_id.clone(),
                    Some(bin_probability(&adjusted, mu, sigma)),
                    true,
                )
            }
        })
        .collect();

    let raw_sum: f64 = conditioned.iter().filter_map(|(_, p, _)| *p).sum();

    if raw_sum <= 0.0 {
        let uniform = 1.0 / bins.len() as f64;
        return bins
            .iter()
            .map(|b| (b.outcome_id.clone(), uniform, true))
            .collect();
    }

    conditioned
        .into_iter()
        .map(|(id, p, possible)| match p {
            Some(p) => (id, p / raw_sum, possible),
            None => (id, 0.0, false),
        })
        .collect()
}

/// Build full `BinProbability` records, joining fair probabilities against
/// current market prices.
pub fn build_bin_probabilities(
    bins: &[Bin],
    metric: Metric,
    mu: Option<f64>,
    sigma: f64,
    max_so_far: Option<f64>,
    market_prices: &std::collections::HashMap<String, f64>,
) -> Vec<BinProbability> {
    let fair = compute_bin_probabilities(bins, metric, mu, sigma, max_so_far);
    bins.iter()
        .zip(fair.iter())
        .map(|(bin, (_, fair_probability, is_possible))| {
            let market_price = market_prices.get(&bin.token_id).copied().unwrap_or(0.5);
            BinProbability {
                outcome_id: bin.outcome_id.clone(),
                label: bin.label.clone(),
                fair_probability: *fair_probability,
                market_price,
                edge: fair_probability - market_price,
                is_possible: *is_possible,
            }
        })
        .collect()
}

/// `shouldTrade(edge, threshold, fair, isPossible)`.
pub fn should_trade(edge: f64, threshold: f64, is_possible: bool) -> Option<Side> {
    if !is_possible {
        return None;
    }
    if edge > threshold {
        Some(Side::Buy)
    } else if edge < -threshold {
        Some(Side::Sell)
    } else {
        None
    }
}

/// Kelly sizing for a BUY at market price `p` with fair probability `f`,
/// both in (0,1): `k = (f*(1/p - 1) - (1 - f)) / (1/p - 1)`, clamped to
/// `[0, max_fraction]`.
pub fn kelly_fraction(fair: f64, price: f64, max_fraction: f64) -> f64 {
    if price <= 0.0 || price >= 1.0 {
        return 0.0;
    }
    let b = 1.0 / price - 1.0;
    if b <= 0.0 {
        return 0.0;
    }
    let k = (fair * b - (1.0 - fair)) / b;
    k.clamp(0.0, max_fraction)
}
