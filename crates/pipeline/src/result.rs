//! Result assembly
//!
//! Outcomes of (zone, layer, slice) combinations are collected in a
//! [`ResultTableBuilder`], which may be shared between reducer threads, and
//! frozen into a read-only [`ResultTable`].

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Mutex;
use zonestats_algorithms::statistics::{ObservationValue, Reduction, ReductionKind};
use zonestats_core::{Error, ErrorKind, Result};

/// Identifies one requested combination.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResultKey {
    pub project: String,
    pub zone: String,
    pub layer: String,
    /// Time slice label
    pub period: String,
}

impl ResultKey {
    pub fn new(
        project: impl Into<String>,
        zone: impl Into<String>,
        layer: impl Into<String>,
        period: impl Into<String>,
    ) -> Self {
        Self {
            project: project.into(),
            zone: zone.into(),
            layer: layer.into(),
            period: period.into(),
        }
    }
}

impl fmt::Display for ResultKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}/{}", self.project, self.zone, self.layer, self.period)
    }
}

/// A computed value with its provenance.
#[derive(Debug, Clone)]
pub struct Observation {
    pub value: ObservationValue,
    pub statistic: ReductionKind,
    /// Area-weighted count of valid pixels
    pub valid_weight: f64,
    pub covered_ha: f64,
    pub dataset: String,
    pub unit: String,
}

impl Observation {
    pub fn from_reduction(reduction: Reduction, dataset: &str, unit: &str) -> Self {
        Self {
            value: reduction.value,
            statistic: reduction.kind,
            valid_weight: reduction.valid_weight,
            covered_ha: reduction.covered_ha,
            dataset: dataset.to_string(),
            unit: unit.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum Outcome {
    Computed(Observation),
    Missing { kind: ErrorKind, message: String },
}

impl Outcome {
    pub fn missing(err: &Error) -> Self {
        Outcome::Missing {
            kind: err.kind(),
            message: err.to_string(),
        }
    }

    pub fn observation(&self) -> Option<&Observation> {
        match self {
            Outcome::Computed(obs) => Some(obs),
            Outcome::Missing { .. } => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResultEntry {
    pub key: ResultKey,
    pub outcome: Outcome,
}

#[derive(Default)]
struct Pending {
    entries: Vec<ResultEntry>,
    seen: HashSet<ResultKey>,
}

/// Accumulates entries; safe to share between threads.
pub struct ResultTableBuilder {
    rank: HashMap<ResultKey, usize>,
    pending: Mutex<Pending>,
}

impl ResultTableBuilder {
    /// Builder expecting exactly the `requested` keys, in that order.
    pub fn new(requested: impl IntoIterator<Item = ResultKey>) -> Self {
        let rank = requested
            .into_iter()
            .enumerate()
            .map(|(i, key)| (key, i))
            .collect();
        Self {
            rank,
            pending: Mutex::new(Pending::default()),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Pending>> {
        self.pending
            .lock()
            .map_err(|_| Error::Other("result builder lock poisoned".into()))
    }

    /// Add an entry. A key seen before is rejected with
    /// [`Error::DuplicateObservation`], a key that was never requested with
    /// [`Error::Other`].
    pub fn insert(&self, entry: ResultEntry) -> Result<()> {
        if !self.rank.contains_key(&entry.key) {
            return Err(Error::Other(format!("outcome for unrequested key {}", entry.key)));
        }
        let mut pending = self.lock()?;
        if !pending.seen.insert(entry.key.clone()) {
            return Err(Error::DuplicateObservation(entry.key.to_string()));
        }
        pending.entries.push(entry);
        Ok(())
    }

    pub fn computed(&self, key: ResultKey, observation: Observation) -> Result<()> {
        self.insert(ResultEntry {
            key,
            outcome: Outcome::Computed(observation),
        })
    }

    pub fn missing(&self, key: ResultKey, err: &Error) -> Result<()> {
        self.insert(ResultEntry {
            key,
            outcome: Outcome::missing(err),
        })
    }

    pub fn len(&self) -> usize {
        self.lock().map(|p| p.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Freeze into a table in request order.
    ///
    /// Every requested key must have an outcome.
    pub fn finalize(self) -> Result<ResultTable> {
        let Pending { mut entries, seen } = self
            .pending
            .into_inner()
            .map_err(|_| Error::Other("result builder lock poisoned".into()))?;

        if let Some(absent) = self.rank.keys().find(|k| !seen.contains(*k)) {
            return Err(Error::Other(format!("no outcome recorded for {}", absent)));
        }

        let rank = &self.rank;
        entries.sort_by_key(|e| rank[&e.key]);
        Ok(ResultTable::from_entries(entries))
    }
}

/// Read-only table of outcomes, one per key.
#[derive(Debug, Clone, Default)]
pub struct ResultTable {
    entries: Vec<ResultEntry>,
    index: HashMap<ResultKey, usize>,
}

impl ResultTable {
    fn from_entries(entries: Vec<ResultEntry>) -> Self {
        let index = entries
            .iter()
            .enumerate()
            .map(|(i, e)| (e.key.clone(), i))
            .collect();
        Self { entries, index }
    }

    pub fn get(&self, key: &ResultKey) -> Option<&Outcome> {
        self.index.get(key).map(|&i| &self.entries[i].outcome)
    }

    pub fn entries(&self) -> &[ResultEntry] {
        &self.entries
    }

    pub fn observations(&self) -> impl Iterator<Item = (&ResultKey, &Observation)> {
        self.entries
            .iter()
            .filter_map(|e| e.outcome.observation().map(|o| (&e.key, o)))
    }

    pub fn missing(&self) -> impl Iterator<Item = &ResultEntry> {
        self.entries
            .iter()
            .filter(|e| matches!(e.outcome, Outcome::Missing { .. }))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Scalar values of one zone and layer by period, in table order.
    /// Missing and non-scalar outcomes give `None`.
    pub fn series(&self, zone: &str, layer: &str) -> Vec<(String, Option<f64>)> {
        self.entries
            .iter()
            .filter(|e| e.key.zone == zone && e.key.layer == layer)
            .map(|e| {
                let value = e
                    .outcome
                    .observation()
                    .and_then(|o| o.value.as_scalar());
                (e.key.period.clone(), value)
            })
            .collect()
    }
}
