use crate::error::{Result, ShootingError};
use serde::{Deserialize, Serialize};

/// Observed trajectory: strictly increasing timestamps, one state per
/// timestamp, every state of the same dimension. Validated once at
/// construction and read-only afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "DatasetRecord", into = "DatasetRecord")]
pub struct Dataset {
    times: Vec<f64>,
    states: Vec<Vec<f64>>,
}

#[derive(Serialize, Deserialize)]
struct DatasetRecord {
    times: Vec<f64>,
    states: Vec<Vec<f64>>,
}

impl TryFrom<DatasetRecord> for Dataset {
    type Error = ShootingError;

    fn try_from(record: DatasetRecord) -> Result<Self> {
        Dataset::new(record.times, record.states)
    }
}

impl From<Dataset> for DatasetRecord {
    fn from(dataset: Dataset) -> Self {
        Self {
            times: dataset.times,
            states: dataset.states,
        }
    }
}

impl Dataset {
    pub fn new(times: Vec<f64>, states: Vec<Vec<f64>>) -> Result<Self> {
        if times.len() != states.len() {
            return Err(ShootingError::mismatch(
                "dataset samples",
                times.len(),
                states.len(),
            ));
        }
        if times.len() < 2 {
            return Err(ShootingError::invalid(format!(
                "dataset needs at least 2 samples, got {}",
                times.len()
            )));
        }
        if times.iter().any(|t| !t.is_finite()) {
            return Err(ShootingError::invalid("dataset timestamps must be finite"));
        }
        if let Some(k) = times.windows(2).position(|w| w[1] <= w[0]) {
            return Err(ShootingError::invalid(format!(
                "dataset timestamps must be strictly increasing (t[{}] = {} >= t[{}] = {})",
                k,
                times[k],
                k + 1,
                times[k + 1]
            )));
        }

        let dim = states[0].len();
        if dim == 0 {
            return Err(ShootingError::invalid("observed states must have positive dimension"));
        }
        for state in &states {
            if state.len() != dim {
                return Err(ShootingError::mismatch("observed state", dim, state.len()));
            }
            if state.iter().any(|v| !v.is_finite()) {
                return Err(ShootingError::invalid("observed states must be finite"));
            }
        }

        Ok(Self { times, states })
    }

    /// Builds a dataset from `(timestamp, state)` pairs.
    pub fn from_samples<I>(samples: I) -> Result<Self>
    where
        I: IntoIterator<Item = (f64, Vec<f64>)>,
    {
        let (times, states) = samples.into_iter().unzip();
        Self::new(times, states)
    }

    /// Row-major flattened states, as handed over by JS callers.
    pub fn from_flat(times: Vec<f64>, flat_states: &[f64], dimension: usize) -> Result<Self> {
        if dimension == 0 || flat_states.len() != times.len() * dimension {
            return Err(ShootingError::mismatch(
                "flattened states",
                times.len() * dimension,
                flat_states.len(),
            ));
        }
        let states = flat_states.chunks(dimension).map(<[f64]>::to_vec).collect();
        Self::new(times, states)
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.states[0].len()
    }

    pub fn times(&self) -> &[f64] {
        &self.times
    }

    pub fn states(&self) -> &[Vec<f64>] {
        &self.states
    }
}
