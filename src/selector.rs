//! Weighted anti-repetition candidate selection.
//!
//! Pure functions over `(key, usage)` pairs: a modifier's weight decays
//! exponentially with the number of times it has already won, so a low decay
//! factor strongly favors modifiers the audience has not seen recently while
//! a factor near 100 is close to uniform.

use rand::Rng;

/// Normalized selection probabilities for a candidate subset.
///
/// weight(m) = exp(usage(m) * ln(factor / 100)) with factor in (0, 100].
/// If every weight underflows to zero, the entries are treated as equally
/// likely. Returns an empty vector for an empty subset.
///
/// Must be recomputed every draw: the normalization denominator changes as
/// items are removed from the subset.
pub fn probabilities(usages: &[u32], factor: f64) -> Vec<f64> {
    if usages.is_empty() {
        return Vec::new();
    }
    let ln_decay = (factor / 100.0).ln();
    let weights: Vec<f64> = usages
        .iter()
        .map(|&usage| (usage as f64 * ln_decay).exp())
        .collect();
    let sum: f64 = weights.iter().sum();
    if sum <= 0.0 || !sum.is_finite() {
        // All weights underflowed; fall back to uniform
        let uniform = 1.0 / usages.len() as f64;
        return vec![uniform; usages.len()];
    }
    weights.into_iter().map(|w| w / sum).collect()
}

/// Draw up to `count` distinct keys from `candidates` without replacement.
///
/// Probabilities are recomputed over the remaining subset before every draw;
/// each draw walks the cumulative distribution with a uniform value in
/// [0, 1). Returns fewer than `count` keys when the subset is exhausted,
/// which is not an error. Iteration order is the order of `candidates`, so
/// the cumulative walk is deterministic for a fixed random value.
pub fn draw_without_replacement<R: Rng + ?Sized>(
    candidates: &[(String, u32)],
    factor: f64,
    count: usize,
    rng: &mut R,
) -> Vec<String> {
    let mut remaining: Vec<(String, u32)> = candidates.to_vec();
    let mut chosen = Vec::with_capacity(count.min(remaining.len()));

    while chosen.len() < count && !remaining.is_empty() {
        let usages: Vec<u32> = remaining.iter().map(|(_, usage)| *usage).collect();
        let probs = probabilities(&usages, factor);
        let roll: f64 = rng.random();

        let mut cumulative = 0.0;
        let mut picked = remaining.len() - 1;
        for (i, p) in probs.iter().enumerate() {
            cumulative += p;
            if roll < cumulative {
                picked = i;
                break;
            }
        }

        let (key, _) = remaining.remove(picked);
        chosen.push(key);
    }

    chosen
}

/// Draw a single key; used for authoritarian-mode winner selection.
pub fn draw_one<R: Rng + ?Sized>(
    candidates: &[(String, u32)],
    factor: f64,
    rng: &mut R,
) -> Option<String> {
    draw_without_replacement(candidates, factor, 1, rng)
        .into_iter()
        .next()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn subset(usages: &[u32]) -> Vec<(String, u32)> {
        usages
            .iter()
            .enumerate()
            .map(|(i, &u)| (format!("mod{}", i), u))
            .collect()
    }

    #[test]
    fn test_probabilities_normalize() {
        for factor in [0.1, 1.0, 33.3, 100.0] {
            let probs = probabilities(&[0, 1, 2, 5, 9], factor);
            let sum: f64 = probs.iter().sum();
            assert!((sum - 1.0).abs() < 1e-9, "factor {}: sum {}", factor, sum);
        }
    }

    #[test]
    fn test_weight_monotonicity() {
        // Lower usage must get strictly higher probability below factor 100
        let probs = probabilities(&[1, 4], 30.0);
        assert!(probs[0] > probs[1]);

        // At factor 100 the weights are uniform
        let probs = probabilities(&[1, 4], 100.0);
        assert!((probs[0] - probs[1]).abs() < 1e-12);
    }

    #[test]
    fn test_probabilities_empty_subset() {
        assert!(probabilities(&[], 50.0).is_empty());
    }

    #[test]
    fn test_underflow_falls_back_to_uniform() {
        // usage large enough that exp(usage * ln(0.001)) underflows to 0.0
        let probs = probabilities(&[200_000, 300_000, 400_000], 0.1);
        for p in &probs {
            assert!((p - 1.0 / 3.0).abs() < 1e-12);
        }
    }

    #[test]
    fn test_draw_without_replacement_no_duplicates() {
        let mut rng = StdRng::seed_from_u64(7);
        let candidates = subset(&[0, 3, 1, 8, 2]);
        for _ in 0..50 {
            let drawn = draw_without_replacement(&candidates, 20.0, 3, &mut rng);
            assert_eq!(drawn.len(), 3);
            let mut deduped = drawn.clone();
            deduped.sort();
            deduped.dedup();
            assert_eq!(deduped.len(), drawn.len());
        }
    }

    #[test]
    fn test_draw_exhaustion_returns_fewer() {
        let mut rng = StdRng::seed_from_u64(1);
        let candidates = subset(&[0, 1]);
        let drawn = draw_without_replacement(&candidates, 50.0, 6, &mut rng);
        assert_eq!(drawn.len(), 2);

        let drawn = draw_without_replacement(&[], 50.0, 3, &mut rng);
        assert!(drawn.is_empty());
    }

    #[test]
    fn test_draw_one() {
        let mut rng = StdRng::seed_from_u64(3);
        let candidates = subset(&[0, 1, 2]);
        let key = draw_one(&candidates, 50.0, &mut rng);
        assert!(key.is_some());
        assert!(draw_one(&[], 50.0, &mut rng).is_none());
    }

    #[test]
    fn test_low_factor_suppresses_used_modifiers() {
        // With one heavily used modifier and a harsh factor, the fresh
        // modifier should win the overwhelming majority of single draws.
        let mut rng = StdRng::seed_from_u64(42);
        let candidates = vec![("worn".to_string(), 10), ("fresh".to_string(), 0)];
        let mut fresh_wins = 0;
        for _ in 0..1000 {
            if draw_one(&candidates, 10.0, &mut rng).as_deref() == Some("fresh") {
                fresh_wins += 1;
            }
        }
        assert!(fresh_wins > 950, "fresh won only {} of 1000", fresh_wins);
    }
}
