use crate::error::CdsError;
use crate::filter::{Filter, ValueSpec};

/// A filter whose split keys each hold a single value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubFilter {
    filter: Filter,
    split: Vec<(String, String)>,
}

impl SubFilter {
    /// Resolves `split_keys` to `values` over `base`. Both slices must have the
    /// same length.
    pub fn from_tuple(
        base: &Filter,
        split_keys: &[String],
        values: &[String],
    ) -> Result<Self, CdsError> {
        if split_keys.len() != values.len() {
            return Err(CdsError::InvalidDimension(format!(
                "expected {} split values, got {}",
                split_keys.len(),
                values.len()
            )));
        }
        let split: Vec<(String, String)> = split_keys
            .iter()
            .cloned()
            .zip(values.iter().cloned())
            .collect();
        let filter = split.iter().fold(base.clone(), |acc, (key, value)| {
            acc.with_value(key.clone(), ValueSpec::scalar(value.clone()))
        });
        Ok(Self { filter, split })
    }

    pub fn filter(&self) -> &Filter {
        &self.filter
    }

    pub fn into_filter(self) -> Filter {
        self.filter
    }

    pub fn get(&self, key: &str) -> Option<&ValueSpec> {
        self.filter.get(key)
    }

    pub fn format(&self) -> &str {
        self.filter.format()
    }

    pub fn split_keys(&self) -> impl Iterator<Item = &str> {
        self.split.iter().map(|(key, _)| key.as_str())
    }

    /// Resolved split values in split-key order.
    pub fn split_values(&self) -> Vec<&str> {
        self.split.iter().map(|(_, value)| value.as_str()).collect()
    }

    pub fn split_tuple(&self) -> Vec<String> {
        self.split.iter().map(|(_, value)| value.clone()).collect()
    }
}

/// Lazy cartesian expansion of a filter over its split keys.
///
/// Elements come out in lexicographic order over the split keys, the last key
/// varying fastest. Cloning restarts from the clone's position; calling
/// [`expand`] again restarts from the beginning.
#[derive(Debug, Clone)]
pub struct Expansion {
    base: Filter,
    axes: Vec<(String, Vec<String>)>,
    cursor: Option<Vec<usize>>,
    remaining: usize,
}

pub fn expand(filter: &Filter, split_keys: &[String]) -> Result<Expansion, CdsError> {
    let mut axes: Vec<(String, Vec<String>)> = Vec::with_capacity(split_keys.len());
    for key in split_keys {
        if axes.iter().any(|(name, _)| name == key) {
            return Err(CdsError::InvalidDimension(format!("duplicate split key {key}")));
        }
        let value = filter
            .get(key)
            .ok_or_else(|| CdsError::InvalidDimension(key.clone()))?;
        let values = value.values().into_iter().map(str::to_string).collect();
        axes.push((key.clone(), values));
    }
    let remaining = axes.iter().map(|(_, values)| values.len()).product();

    Ok(Expansion {
        base: filter.clone(),
        cursor: (remaining > 0).then(|| vec![0; axes.len()]),
        axes,
        remaining,
    })
}

impl Expansion {
    fn current(&self, cursor: &[usize]) -> SubFilter {
        let mut filter = self.base.clone();
        let mut split = Vec::with_capacity(self.axes.len());
        for ((key, values), &index) in self.axes.iter().zip(cursor) {
            let value = values[index].clone();
            filter = filter.with_value(key.clone(), ValueSpec::scalar(value.clone()));
            split.push((key.clone(), value));
        }
        SubFilter { filter, split }
    }

    fn advance(&mut self) {
        let Some(cursor) = self.cursor.as_mut() else {
            return;
        };
        for (position, (_, values)) in self.axes.iter().enumerate().rev() {
            cursor[position] += 1;
            if cursor[position] < values.len() {
                return;
            }
            cursor[position] = 0;
        }
        self.cursor = None;
    }
}

impl Iterator for Expansion {
    type Item = SubFilter;

    fn next(&mut self) -> Option<Self::Item> {
        let sub = self.current(self.cursor.as_deref()?);
        self.remaining -= 1;
        self.advance();
        Some(sub)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl ExactSizeIterator for Expansion {}
