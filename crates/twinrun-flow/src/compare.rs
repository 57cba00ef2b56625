//! Field-level diffing of paired results.
//!
//! Both payloads are flattened to dot-joined leaf paths. Recursion only
//! descends into JSON objects; arrays and scalars are leaves. For each pair:
//!
//! - shared paths with unequal numeric values record `test - benchmark`
//! - shared paths with other unequal values record [`DiffValue::Changed`]
//! - benchmark-only paths record [`DiffValue::Deleted`]
//! - test-only paths record [`DiffValue::Added`]
//!
//! The [`Comparator`] accumulates every entry per path across the run and
//! [`Comparator::finalize`] reduces them to a [`DiffReport`].
//!
//! # Example
//!
//! ```rust
//! use serde_json::json;
//! use twinrun_flow::compare::{Comparator, DiffValue};
//!
//! let mut comparator = Comparator::new();
//! let diff = comparator.compare(
//!     &json!({"a": 1, "b": {"c": 2}}),
//!     &json!({"a": 1, "b": {"c": 5}, "d": 9}),
//! );
//! assert_eq!(diff["b.c"], DiffValue::Delta(3.0));
//! assert_eq!(diff["d"], DiffValue::Added);
//! ```

use std::collections::BTreeMap;
use std::fmt;

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use serde_json::Value;

/// Path separator of flattened keys.
pub const PATH_SEPARATOR: char = '.';

/// One observed difference at a leaf path.
#[derive(Debug, Clone, PartialEq)]
pub enum DiffValue {
    /// Numeric difference `test - benchmark`.
    Delta(f64),
    /// Present only in the test output.
    Added,
    /// Present only in the benchmark output.
    Deleted,
    /// Unequal non-numeric values.
    Changed {
        /// Benchmark value.
        benchmark: Value,
        /// Test value.
        test: Value,
    },
}

impl DiffValue {
    /// Returns true for the non-numeric sentinels.
    #[must_use]
    pub const fn is_sentinel(&self) -> bool {
        !matches!(self, Self::Delta(_))
    }

    /// Returns the numeric delta, if any.
    #[must_use]
    pub const fn as_delta(&self) -> Option<f64> {
        match self {
            Self::Delta(d) => Some(*d),
            _ => None,
        }
    }
}

impl Serialize for DiffValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Delta(d) => serializer.serialize_f64(*d),
            Self::Added => serializer.serialize_str("added"),
            Self::Deleted => serializer.serialize_str("deleted"),
            Self::Changed { benchmark, test } => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry(
                    "changed",
                    &serde_json::json!({"benchmark": benchmark, "test": test}),
                )?;
                map.end()
            }
        }
    }
}

/// Flattens a nested payload into leaf paths.
#[must_use]
pub fn flatten(value: &Value) -> BTreeMap<String, Value> {
    fn visit(value: &Value, path: &mut String, out: &mut BTreeMap<String, Value>) {
        match value {
            Value::Object(map) => {
                for (key, child) in map {
                    let len = path.len();
                    if !path.is_empty() {
                        path.push(PATH_SEPARATOR);
                    }
                    path.push_str(key);
                    visit(child, path, out);
                    path.truncate(len);
                }
            }
            leaf => {
                out.insert(path.clone(), leaf.clone());
            }
        }
    }

    let mut out = BTreeMap::new();
    visit(value, &mut String::new(), &mut out);
    out
}

/// Computes the per-path differences of one pair.
#[must_use]
pub fn diff(benchmark: &Value, test: &Value) -> BTreeMap<String, DiffValue> {
    let before = flatten(benchmark);
    let mut after = flatten(test);
    let mut result = BTreeMap::new();

    for (path, old) in before {
        match after.remove(&path) {
            None => {
                result.insert(path, DiffValue::Deleted);
            }
            Some(new) => {
                if let Some(entry) = leaf_diff(old, new) {
                    result.insert(path, entry);
                }
            }
        }
    }
    for path in after.into_keys() {
        result.insert(path, DiffValue::Added);
    }
    result
}

#[allow(clippy::float_cmp)] // Exact equality is the intent
fn leaf_diff(old: Value, new: Value) -> Option<DiffValue> {
    if let (Some(a), Some(b)) = (integer(&old), integer(&new)) {
        return (a != b).then(|| DiffValue::Delta(int_delta(a, b)));
    }
    if let (Some(a), Some(b)) = (numeric(&old), numeric(&new)) {
        return (a != b).then(|| DiffValue::Delta(b - a));
    }
    (old != new).then_some(DiffValue::Changed {
        benchmark: old,
        test: new,
    })
}

// Subtracts before converting so large integers keep an exact delta.
#[allow(clippy::cast_precision_loss)]
fn int_delta(benchmark: i128, test: i128) -> f64 {
    (test - benchmark) as f64
}

fn integer(value: &Value) -> Option<i128> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .map(i128::from)
            .or_else(|| n.as_u64().map(i128::from)),
        _ => None,
    }
}

fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        _ => None,
    }
}

/// Run-wide accumulator of field differences.
#[derive(Debug, Clone, Default)]
pub struct Comparator {
    cases_seen: usize,
    cases_with_diff: usize,
    fields: BTreeMap<String, Vec<DiffValue>>,
}

impl Comparator {
    /// Creates an empty accumulator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Compares one pair, accumulates its differences, and returns them.
    pub fn compare(&mut self, benchmark: &Value, test: &Value) -> BTreeMap<String, DiffValue> {
        let result = diff(benchmark, test);
        for (path, entry) in &result {
            self.fields
                .entry(path.clone())
                .or_default()
                .push(entry.clone());
        }
        self.cases_seen += 1;
        if !result.is_empty() {
            self.cases_with_diff += 1;
        }
        result
    }

    /// Number of compared pairs.
    #[must_use]
    pub const fn cases_seen(&self) -> usize {
        self.cases_seen
    }

    /// Number of compared pairs with at least one difference.
    #[must_use]
    pub const fn cases_with_diff(&self) -> usize {
        self.cases_with_diff
    }

    /// Accumulated entries per path.
    #[must_use]
    pub const fn fields(&self) -> &BTreeMap<String, Vec<DiffValue>> {
        &self.fields
    }

    /// Reduces the accumulated entries to per-field statistics.
    ///
    /// Fields whose first entry is a sentinel report only a count. Other
    /// fields report the mean of their numeric entries and the count of all
    /// entries.
    #[must_use]
    pub fn finalize(&self) -> DiffReport {
        let fields = self
            .fields
            .iter()
            .map(|(name, entries)| {
                let diff_mean = match entries.first() {
                    Some(first) if !first.is_sentinel() => mean(entries),
                    _ => None,
                };
                FieldSummary {
                    name: name.clone(),
                    diff_mean,
                    count: entries.len(),
                }
            })
            .collect();
        DiffReport {
            cases_seen: self.cases_seen,
            cases_with_diff: self.cases_with_diff,
            fields,
        }
    }
}

#[allow(clippy::cast_precision_loss)] // Entry counts fit easily in f64
fn mean(entries: &[DiffValue]) -> Option<f64> {
    let deltas: Vec<f64> = entries.iter().filter_map(DiffValue::as_delta).collect();
    if deltas.is_empty() {
        return None;
    }
    Some(deltas.iter().sum::<f64>() / deltas.len() as f64)
}

/// Statistics of one flattened field.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldSummary {
    /// Dot-joined path.
    pub name: String,
    /// Mean numeric delta; absent for sentinel fields.
    pub diff_mean: Option<f64>,
    /// Number of pairs that differed at this path.
    pub count: usize,
}

/// Final comparison report of a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiffReport {
    /// Number of compared pairs.
    pub cases_seen: usize,
    /// Number of compared pairs with at least one difference.
    pub cases_with_diff: usize,
    /// Per-field statistics, ordered by path.
    pub fields: Vec<FieldSummary>,
}

impl fmt::Display for DiffReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Total test cases: {}", self.cases_seen)?;
        writeln!(f, "Total test cases with differences: {}", self.cases_with_diff)?;
        if self.cases_with_diff == 0 {
            return Ok(());
        }
        writeln!(f, "Changes in output:")?;
        writeln!(f, "{:>30} {:>10} {:>10}", "name", "diff_mean", "count")?;
        for field in &self.fields {
            match field.diff_mean {
                Some(mean) => writeln!(f, "{:>30} {:>10.2} {:>10}", field.name, mean, field.count)?,
                None => writeln!(f, "{:>30} {:>10} {:>10}", field.name, "", field.count)?,
            }
        }
        Ok(())
    }
}
