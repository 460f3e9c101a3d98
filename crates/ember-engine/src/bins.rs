//! Fire-PM2.5 concentration bins.
//!
//! Both empirical tables arrive with their bin boundaries encoded as strings,
//! each in its own notation:
//!
//! - bootstrap hazard-ratio bins: interval notation, `(0.1,0.25]`
//! - precomputed attributable-fraction bins: ranges, `0.1-0.2`, or open-ended `5+`
//!
//! Brackets in the interval notation are ignored. Every bin is matched as the
//! half-open interval `[lower, upper)`.

use std::collections::BTreeMap;

use ember_core::error::BinParseError;
use ordered_float::OrderedFloat;

/// Half-open concentration interval `[lower, upper)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BinBounds {
    pub lower: f64,
    pub upper: f64,
}

impl BinBounds {
    /// Build bounds, rejecting NaN and empty intervals. `upper` may be `+inf`.
    pub fn new(lower: f64, upper: f64) -> Result<Self, BinParseError> {
        if lower.is_nan() || upper.is_nan() || lower.is_infinite() || lower >= upper {
            return Err(BinParseError::Empty {
                lower: lower.to_string(),
                upper: upper.to_string(),
            });
        }
        Ok(Self { lower, upper })
    }

    pub fn contains(&self, concentration: f64) -> bool {
        self.lower <= concentration && concentration < self.upper
    }

    fn key(&self) -> BinKey {
        (OrderedFloat(self.lower), OrderedFloat(self.upper))
    }
}

fn parse_bound(raw: &str, whole: &str) -> Result<f64, BinParseError> {
    raw.trim()
        .parse::<f64>()
        .map_err(|_| BinParseError::Malformed(whole.to_string()))
}

/// Parse interval notation such as `(0.1,0.25]` or `[0,0.1)`.
pub fn parse_interval(s: &str) -> Result<BinBounds, BinParseError> {
    let inner = s.trim().trim_matches(|c| matches!(c, '(' | ')' | '[' | ']'));
    let (lower, upper) = inner
        .split_once(',')
        .ok_or_else(|| BinParseError::Malformed(s.to_string()))?;
    BinBounds::new(parse_bound(lower, s)?, parse_bound(upper, s)?)
}

/// Parse range notation such as `0.1-0.2`, or `5+` for `[5, inf)`.
pub fn parse_range(s: &str) -> Result<BinBounds, BinParseError> {
    let trimmed = s.trim();
    if let Some(lower) = trimmed.strip_suffix('+') {
        return BinBounds::new(parse_bound(lower, s)?, f64::INFINITY);
    }
    // Skip the first character so a leading sign is not taken as the separator.
    let split = trimmed
        .char_indices()
        .skip(1)
        .find(|&(_, c)| c == '-')
        .map(|(i, _)| i)
        .ok_or_else(|| BinParseError::Malformed(s.to_string()))?;
    let (lower, upper) = (&trimmed[..split], &trimmed[split + 1..]);
    BinBounds::new(parse_bound(lower, s)?, parse_bound(upper, s)?)
}

type BinKey = (OrderedFloat<f64>, OrderedFloat<f64>);

/// Bins of one age class, ordered by `(lower, upper)`.
///
/// Lookup returns the first bin in that order containing the concentration.
#[derive(Debug, Clone)]
pub struct BinTable<V> {
    bins: BTreeMap<BinKey, (BinBounds, V)>,
}

impl<V> Default for BinTable<V> {
    fn default() -> Self {
        Self {
            bins: BTreeMap::new(),
        }
    }
}

impl<V> BinTable<V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a value for `bounds`, returning any value it replaced.
    pub fn insert(&mut self, bounds: BinBounds, value: V) -> Option<V> {
        self.bins
            .insert(bounds.key(), (bounds, value))
            .map(|(_, old)| old)
    }

    pub fn get(&self, bounds: &BinBounds) -> Option<&V> {
        self.bins.get(&bounds.key()).map(|(_, v)| v)
    }

    /// Value slot for `bounds`, created empty if absent.
    pub fn entry_or_default(&mut self, bounds: BinBounds) -> &mut V
    where
        V: Default,
    {
        &mut self
            .bins
            .entry(bounds.key())
            .or_insert_with(|| (bounds, V::default()))
            .1
    }

    /// Bin containing `concentration`. NaN matches nothing.
    pub fn find(&self, concentration: f64) -> Option<(&BinBounds, &V)> {
        self.bins
            .values()
            .find(|(bounds, _)| bounds.contains(concentration))
            .map(|(bounds, v)| (bounds, v))
    }

    pub fn len(&self) -> usize {
        self.bins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bins.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&BinBounds, &V)> {
        self.bins.values().map(|(bounds, v)| (bounds, v))
    }
}
