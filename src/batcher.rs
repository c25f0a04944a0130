use crate::ir::TranslationUnit;
use crate::textutil::char_len;

/// Tokens charged per unit for the separator line and its newlines.
pub const SEPARATOR_OVERHEAD_TOKENS: usize = 8;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BatchLimits {
    pub max_batch_tokens: usize,
    pub max_units_per_batch: usize,
    pub chars_per_token: usize,
}

impl Default for BatchLimits {
    fn default() -> Self {
        Self {
            max_batch_tokens: 3000,
            max_units_per_batch: 40,
            chars_per_token: 4,
        }
    }
}

pub fn estimate_tokens(text: &str, chars_per_token: usize) -> usize {
    char_len(text).div_ceil(chars_per_token.max(1))
}

pub fn unit_cost(unit: &TranslationUnit, limits: &BatchLimits) -> usize {
    estimate_tokens(&unit.html, limits.chars_per_token) + SEPARATOR_OVERHEAD_TOKENS
}

/// Greedy, order-preserving packing. A unit that alone exceeds the token
/// ceiling still gets a batch of its own.
pub fn build_batches(units: &[TranslationUnit], limits: &BatchLimits) -> Vec<Vec<TranslationUnit>> {
    let max_units = limits.max_units_per_batch.max(1);
    let mut batches = Vec::new();
    let mut cur: Vec<TranslationUnit> = Vec::new();
    let mut cur_tokens = 0usize;
    for unit in units {
        let cost = unit_cost(unit, limits);
        let over_tokens = cur_tokens + cost > limits.max_batch_tokens;
        if !cur.is_empty() && (over_tokens || cur.len() >= max_units) {
            batches.push(std::mem::take(&mut cur));
            cur_tokens = 0;
        }
        cur.push(unit.clone());
        cur_tokens += cost;
    }
    if !cur.is_empty() {
        batches.push(cur);
    }
    batches
}

pub fn batch_tokens(batch: &[TranslationUnit], limits: &BatchLimits) -> usize {
    batch.iter().map(|u| unit_cost(u, limits)).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn units(sizes: &[usize]) -> Vec<TranslationUnit> {
        sizes
            .iter()
            .enumerate()
            .map(|(i, n)| TranslationUnit::new(i, "a".repeat(*n)))
            .collect()
    }

    #[test]
    fn estimate_rounds_up() {
        assert_eq!(estimate_tokens("", 4), 0);
        assert_eq!(estimate_tokens("abcde", 4), 2);
        assert_eq!(estimate_tokens("ääää", 4), 1);
    }

    #[test]
    fn respects_both_ceilings_and_order() {
        let limits = BatchLimits {
            max_batch_tokens: 60,
            max_units_per_batch: 3,
            chars_per_token: 4,
        };
        let input = units(&[40, 40, 40, 40, 4, 4, 4, 4, 400, 8]);
        let batches = build_batches(&input, &limits);

        let flat: Vec<usize> = batches.iter().flatten().map(|u| u.id).collect();
        assert_eq!(flat, (0..input.len()).collect::<Vec<_>>());
        for b in &batches {
            assert!(b.len() <= 3);
            let oversized_single = b.len() == 1 && unit_cost(&b[0], &limits) > 60;
            assert!(batch_tokens(b, &limits) <= 60 || oversized_single);
        }
        assert!(batches.iter().any(|b| b.len() == 1 && b[0].id == 8));
    }

    #[test]
    fn large_ceilings_give_one_batch() {
        let batches = build_batches(&units(&[10, 20, 30]), &BatchLimits::default());
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 3);
        assert!(build_batches(&[], &BatchLimits::default()).is_empty());
    }
}
