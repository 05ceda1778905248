//! Retrieval-budget allocation across weighted knowledge sources.
//!
//! A retrieval request has a fixed `top_k`. When an app is bound to several
//! knowledge sources, that budget is split between them with the
//! largest-remainder (Hamilton) method:
//!
//! - budget below the number of sources: the highest ranked sources get one
//!   slot each, the rest get nothing
//! - otherwise every source gets one slot, and the remainder is split by
//!   weight, leftovers going to the largest fractional remainders
//!
//! Quotas always sum to exactly the requested budget.

use std::cmp::Ordering;
use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::error::AllocationError;

/// A weighted, prioritized reference to a retrievable source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Binding {
    pub source_id: String,

    /// Relative share of the budget (negative or non-finite counts as 0)
    #[serde(default)]
    pub weight: f64,

    /// Lower is more important; only used for tie-breaks and ordering
    #[serde(default)]
    pub priority: i64,
}

impl Binding {
    pub fn new(source_id: impl Into<String>, weight: f64, priority: i64) -> Self {
        Self {
            source_id: source_id.into(),
            weight,
            priority,
        }
    }
}

/// The quota assigned to one binding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Allocation {
    pub source_id: String,
    pub quota: u32,
    pub weight: f64,
    pub priority: i64,
}

/// Chooses between lenient sanitization and strict validation of bindings.
#[derive(Debug, Clone, Copy, Default)]
pub struct Allocator {
    pub strict: bool,
}

impl Allocator {
    pub fn new(strict: bool) -> Self {
        Self { strict }
    }

    pub fn allocate(
        &self,
        bindings: &[Binding],
        total_budget: u32,
    ) -> Result<Vec<Allocation>, AllocationError> {
        if self.strict {
            allocate_strict(bindings, total_budget)
        } else {
            Ok(allocate(bindings, total_budget))
        }
    }
}

/// Split `total_budget` across `bindings`.
///
/// Malformed bindings (empty id, duplicate id) are dropped and bad weights
/// are clamped to 0. Returns an empty list when the budget is 0 or nothing
/// valid remains.
pub fn allocate(bindings: &[Binding], total_budget: u32) -> Vec<Allocation> {
    let clean = sanitize(bindings);
    if clean.len() < bindings.len() {
        debug!(
            dropped = bindings.len() - clean.len(),
            "Dropped malformed bindings before allocation"
        );
    }
    apportion(clean, total_budget)
}

/// Like [`allocate`], but rejects malformed bindings instead of dropping them.
pub fn allocate_strict(
    bindings: &[Binding],
    total_budget: u32,
) -> Result<Vec<Allocation>, AllocationError> {
    let mut seen = HashSet::new();
    for (index, b) in bindings.iter().enumerate() {
        let id = b.source_id.trim();
        if id.is_empty() {
            return Err(AllocationError::EmptySourceId { index });
        }
        if !b.weight.is_finite() || b.weight < 0.0 {
            return Err(AllocationError::InvalidWeight {
                source_id: id.to_string(),
                weight: b.weight,
            });
        }
        if !seen.insert(id) {
            return Err(AllocationError::DuplicateSourceId(id.to_string()));
        }
    }
    Ok(apportion(sanitize(bindings), total_budget))
}

/// Keep the bindings a retrieval request should actually use: non-empty ids
/// with positive weight. Falls back to a single `fallback_id` source when
/// nothing qualifies, so a request always has somewhere to search.
pub fn prepare_bindings(bindings: &[Binding], fallback_id: &str) -> Vec<Binding> {
    let kept: Vec<Binding> = bindings
        .iter()
        .filter(|b| !b.source_id.trim().is_empty() && b.weight.is_finite() && b.weight > 0.0)
        .cloned()
        .collect();

    if kept.is_empty() {
        debug!(fallback = fallback_id, "No usable bindings, using fallback source");
        return vec![Binding::new(fallback_id, 1.0, 0)];
    }
    kept
}

fn sanitize(bindings: &[Binding]) -> Vec<Binding> {
    let mut seen = HashSet::new();
    let mut clean = Vec::with_capacity(bindings.len());
    for b in bindings {
        let id = b.source_id.trim();
        if id.is_empty() || !seen.insert(id.to_string()) {
            continue;
        }
        let weight = if b.weight.is_finite() && b.weight > 0.0 {
            b.weight
        } else {
            0.0
        };
        clean.push(Binding::new(id, weight, b.priority));
    }
    clean
}

/// Importance order: heavier first, then lower priority, then smaller id.
fn rank_order(a: &Binding, b: &Binding) -> Ordering {
    b.weight
        .total_cmp(&a.weight)
        .then(a.priority.cmp(&b.priority))
        .then_with(|| a.source_id.cmp(&b.source_id))
}

fn apportion(clean: Vec<Binding>, total_budget: u32) -> Vec<Allocation> {
    if total_budget == 0 || clean.is_empty() {
        return Vec::new();
    }

    let n = clean.len();
    let quotas: Vec<u32> = if n == 1 {
        vec![total_budget]
    } else if (total_budget as usize) < n {
        select_top(&clean, total_budget as usize)
    } else {
        largest_remainder(&clean, total_budget)
    };

    let mut out: Vec<Allocation> = clean
        .into_iter()
        .zip(quotas)
        .map(|(b, quota)| Allocation {
            source_id: b.source_id,
            quota,
            weight: b.weight,
            priority: b.priority,
        })
        .collect();
    out.sort_by(|a, b| {
        a.priority
            .cmp(&b.priority)
            .then_with(|| a.source_id.cmp(&b.source_id))
    });
    out
}

/// Not enough budget for one slot each: the top `k` sources get one.
fn select_top(clean: &[Binding], k: usize) -> Vec<u32> {
    let mut order: Vec<usize> = (0..clean.len()).collect();
    order.sort_by(|&a, &b| rank_order(&clean[a], &clean[b]));

    let mut quotas = vec![0u32; clean.len()];
    for &i in order.iter().take(k) {
        quotas[i] = 1;
    }
    quotas
}

fn largest_remainder(clean: &[Binding], total_budget: u32) -> Vec<u32> {
    let n = clean.len();
    let remaining = u64::from(total_budget) - n as u64;

    // Scale by the heaviest weight so the sum stays finite for any finite input.
    let max_weight = clean.iter().map(|b| b.weight).fold(0.0_f64, f64::max);
    let scaled = |b: &Binding| if max_weight > 0.0 { b.weight / max_weight } else { 0.0 };
    let weight_sum: f64 = clean.iter().map(scaled).sum();
    let uniform = !(weight_sum.is_finite() && weight_sum > 0.0);
    let effective = |b: &Binding| if uniform { 1.0 } else { scaled(b) };
    let divisor = if uniform { n as f64 } else { weight_sum };

    let ideal: Vec<f64> = clean
        .iter()
        .map(|b| (effective(b) / divisor) * remaining as f64)
        .collect();
    let mut extra: Vec<u64> = ideal
        .iter()
        .map(|v| (v.floor().max(0.0) as u64).min(remaining))
        .collect();

    // Float rounding can push a floor one unit past its exact value; give
    // those back so the leftover below can never underflow.
    let mut used: u64 = extra.iter().fold(0u64, |acc, &e| acc.saturating_add(e));
    while used > remaining {
        let Some(i) = (0..n).filter(|&i| extra[i] > 0).max_by(|&a, &b| {
            (ideal[a] - extra[a] as f64).total_cmp(&(ideal[b] - extra[b] as f64)).reverse()
        }) else {
            break;
        };
        extra[i] -= 1;
        used -= 1;
    }

    let leftover = remaining - used;
    if leftover > 0 {
        let mut order: Vec<usize> = (0..n).collect();
        order.sort_by(|&a, &b| {
            let frac_a = ideal[a] - extra[a] as f64;
            let frac_b = ideal[b] - extra[b] as f64;
            frac_b
                .total_cmp(&frac_a)
                .then_with(|| rank_order(&clean[a], &clean[b]))
        });
        trace!(leftover, "Distributing leftover units by largest remainder");
        for step in 0..leftover {
            extra[order[(step % n as u64) as usize]] += 1;
        }
    }

    extra.into_iter().map(|e| 1 + e as u32).collect()
}
