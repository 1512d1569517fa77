//! Logits post-processing for sampled decoding.
//!
//! [`LogitsProcessor`] turns the raw next-token scores of one step into a
//! constrained distribution. Stages run in a fixed order, each mutating the
//! score slice in place:
//!
//! 1. bad-word filter
//! 2. repetition penalty
//! 3. temperature
//! 4. top-k (iterative mean narrowing)
//! 5. top-p (nucleus)
//!
//! followed by [`softmax`] and a [`multinomial`] draw. Filtered ids are set
//! to negative infinity.

use std::collections::BTreeSet;

use rand::Rng;

use crate::sampling::GenerationParameters;
use crate::{Error, Result};

const FILTER_VALUE: f32 = f32::NEG_INFINITY;

/// Number of mean-threshold passes applied before the top-k cut.
pub const TOP_K_NARROWING_PASSES: usize = 5;

/// Score transforms configured from one call's [`GenerationParameters`].
///
/// Holds no per-step state, so one processor serves every step of a call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LogitsProcessor {
    temperature: f32,
    top_k: usize,
    top_p: f32,
    repetition_penalty: f32,
}

impl LogitsProcessor {
    #[must_use]
    pub fn new(params: &GenerationParameters) -> Self {
        Self {
            temperature: params.temperature,
            top_k: params.top_k,
            top_p: params.top_p,
            repetition_penalty: params.repetition_penalty,
        }
    }

    /// Set every banned id to negative infinity. Ids outside the vocabulary
    /// are ignored.
    pub fn apply_bad_word_filter(&self, scores: &mut [f32], banned: &BTreeSet<u32>) {
        for &id in banned {
            if let Some(score) = scores.get_mut(id as usize) {
                *score = FILTER_VALUE;
            }
        }
    }

    /// Push already-seen ids toward lower probability: negative scores are
    /// multiplied by the penalty, others divided. A repeated id is
    /// penalized once. No-op for a penalty of exactly 1.0.
    #[allow(clippy::float_cmp)]
    pub fn apply_repetition_penalty(&self, input_ids: &[u32], scores: &mut [f32]) {
        if self.repetition_penalty == 1.0 {
            return;
        }
        let penalized: Vec<(usize, f32)> = input_ids
            .iter()
            .filter_map(|&id| {
                let index = id as usize;
                let score = *scores.get(index)?;
                let value = if score < 0.0 {
                    score * self.repetition_penalty
                } else {
                    score / self.repetition_penalty
                };
                Some((index, value))
            })
            .collect();
        for (index, value) in penalized {
            scores[index] = value;
        }
    }

    /// Divide every score by the temperature.
    ///
    /// The temperature is assumed valid (> 0); see
    /// [`GenerationParameters::validate`].
    pub fn apply_temperature(&self, scores: &mut [f32]) {
        for score in scores.iter_mut() {
            *score /= self.temperature;
        }
    }

    /// Keep at most `top_k` ids out of those that survive
    /// [`TOP_K_NARROWING_PASSES`] rounds of "keep what is strictly above the
    /// mean of the current candidates".
    ///
    /// This is not a literal top-k: on a peaked distribution the passes can
    /// leave fewer than `top_k` candidates. A pass that would leave nothing
    /// keeps the previous candidates. `top_k == 0` disables the stage.
    pub fn apply_top_k(&self, scores: &mut [f32]) {
        if self.top_k == 0 || scores.is_empty() {
            return;
        }

        let mut candidates: Vec<(usize, f32)> = scores.iter().copied().enumerate().collect();
        for _ in 0..TOP_K_NARROWING_PASSES {
            let mean = mean(candidates.iter().map(|&(_, s)| s));
            let narrowed: Vec<(usize, f32)> = candidates
                .iter()
                .copied()
                .filter(|&(_, s)| f64::from(s) > mean)
                .collect();
            if narrowed.is_empty() {
                break;
            }
            candidates = narrowed;
        }

        candidates.sort_by(|a, b| b.1.total_cmp(&a.1));
        candidates.truncate(self.top_k);
        mask_except(scores, candidates.iter().map(|&(i, _)| i));
    }

    /// Remove the low-probability tail whose cumulative mass is at most
    /// `1 - top_p`. The most probable id always survives.
    pub fn apply_top_p(&self, scores: &mut [f32]) {
        let mut finite: Vec<(usize, f32)> = scores
            .iter()
            .copied()
            .enumerate()
            .filter(|&(_, s)| s > FILTER_VALUE)
            .collect();
        if finite.is_empty() {
            return;
        }
        finite.sort_by(|a, b| a.1.total_cmp(&b.1));

        let sorted: Vec<f32> = finite.iter().map(|&(_, s)| s).collect();
        let threshold = 1.0 - self.top_p;
        let mut cumulative = 0.0f32;
        let mut keep: Vec<usize> = Vec::with_capacity(finite.len());
        for (&(index, _), prob) in finite.iter().zip(softmax(&sorted)) {
            cumulative += prob;
            if cumulative > threshold {
                keep.push(index);
            }
        }
        if keep.is_empty() {
            if let Some(&(best, _)) = finite.last() {
                keep.push(best);
            }
        }
        mask_except(scores, keep);
    }

    /// Run every stage in order.
    pub fn process(&self, scores: &mut [f32], input_ids: &[u32], banned: &BTreeSet<u32>) {
        self.apply_bad_word_filter(scores, banned);
        self.apply_repetition_penalty(input_ids, scores);
        self.apply_temperature(scores);
        self.apply_top_k(scores);
        self.apply_top_p(scores);
    }

    /// Process the scores and draw the next token.
    ///
    /// # Errors
    /// Returns a generation error if no token is left to draw from.
    pub fn sample<R: Rng + ?Sized>(
        &self,
        scores: &mut [f32],
        input_ids: &[u32],
        banned: &BTreeSet<u32>,
        rng: &mut R,
    ) -> Result<u32> {
        self.process(scores, input_ids, banned);
        let probs = softmax(scores);
        let index = multinomial(&probs, rng).ok_or_else(|| {
            Error::Generation("every candidate token was filtered out".into())
        })?;
        u32::try_from(index)
            .map_err(|_| Error::Generation(format!("token index {index} overflows u32")))
    }
}

fn mean(values: impl Iterator<Item = f32>) -> f64 {
    let (sum, count) = values.fold((0.0f64, 0usize), |(sum, n), v| (sum + f64::from(v), n + 1));
    #[allow(clippy::cast_precision_loss)]
    let count = count as f64;
    sum / count
}

fn mask_except(scores: &mut [f32], keep: impl IntoIterator<Item = usize>) {
    let mut kept = vec![false; scores.len()];
    for index in keep {
        kept[index] = true;
    }
    for (score, kept) in scores.iter_mut().zip(kept) {
        if !kept {
            *score = FILTER_VALUE;
        }
    }
}

/// Numerically stable softmax. An all-`-inf` input gives all zeros.
#[must_use]
pub fn softmax(scores: &[f32]) -> Vec<f32> {
    let max = scores.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    if max == f32::NEG_INFINITY {
        return vec![0.0; scores.len()];
    }
    let exps: Vec<f32> = scores.iter().map(|&s| (s - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

/// Index of the first maximum score, or `None` for an empty slice.
#[must_use]
pub fn argmax(scores: &[f32]) -> Option<usize> {
    if scores.is_empty() {
        return None;
    }
    let mut best = 0;
    for (i, &score) in scores.iter().enumerate().skip(1) {
        if score > scores[best] {
            best = i;
        }
    }
    Some(best)
}

/// Draw one index from a (not necessarily normalized) probability vector.
///
/// Picks the leftmost index whose cumulative probability reaches a uniform
/// draw in `[0, 1)`. Returns `None` if the vector has no positive mass.
pub fn multinomial<R: Rng + ?Sized>(probs: &[f32], rng: &mut R) -> Option<usize> {
    let total: f64 = probs.iter().map(|&p| f64::from(p)).sum();
    if !(total.is_finite() && total > 0.0) {
        return None;
    }

    let mut acc = 0.0f64;
    let cumulative: Vec<f64> = probs
        .iter()
        .map(|&p| {
            acc += f64::from(p) / total;
            acc
        })
        .collect();

    let draw: f64 = rng.gen();
    let last = probs.len() - 1;
    let mut index = cumulative.partition_point(|&c| c < draw).min(last);
    // A zero-mass index can only be hit on a cumulative tie; move past it.
    while probs[index] <= 0.0 && index < last {
        index += 1;
    }
    if probs[index] <= 0.0 {
        index = probs.iter().rposition(|&p| p > 0.0)?;
    }
    Some(index)
}
