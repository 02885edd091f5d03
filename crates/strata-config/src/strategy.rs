//! Merge strategies overriding the default "first wins" layering for
//! specific keys.

use std::{collections::HashMap, fmt, rc::Rc};

use anyhow::Context as _;

use crate::value::Value;

/// Per-key combiner. Receives the next value encountered during the priority
/// walk and the accumulator so far (`None` on the first call; the layering
/// walk runs highest priority first, so earlier values come from
/// higher-prioritized sources), and produces the new accumulator.
pub type Strategy = Rc<dyn Fn(Value, Option<Value>) -> anyhow::Result<Value>>;

/// Map from key to the [`Strategy`] applied to it, shared by a
/// [`LayeredConfig`](crate::LayeredConfig) and all its sub-views.
#[derive(Clone, Default)]
pub struct StrategyMap {
    inner: HashMap<String, Strategy>,
}

impl fmt::Debug for StrategyMap {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.debug_set().entries(self.inner.keys()).finish()
    }
}

impl StrategyMap {
    /// Creates an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `strategy` for `key`, at any nesting level.
    #[must_use]
    pub fn with(
        mut self,
        key: impl Into<String>,
        strategy: impl Fn(Value, Option<Value>) -> anyhow::Result<Value> + 'static,
    ) -> Self {
        self.inner.insert(key.into(), Rc::new(strategy));
        self
    }

    pub(crate) fn get(&self, key: &str) -> Option<&Strategy> {
        self.inner.get(key)
    }
}

/// Combines the accumulator with the next value additively: numbers add,
/// strings and arrays concatenate. The first call passes the value through.
///
/// # Errors
///
/// Fails on operands of mismatched or non-additive types.
pub fn add(next: Value, previous: Option<Value>) -> anyhow::Result<Value> {
    let Some(previous) = previous else {
        return Ok(next);
    };
    Ok(match (previous, next) {
        (Value::Number(previous), Value::Number(next)) => add_numbers(&previous, &next)?,
        (Value::String(mut previous), Value::String(next)) => {
            previous.push_str(&next);
            Value::String(previous)
        }
        (Value::Array(mut previous), Value::Array(next)) => {
            previous.extend(next);
            Value::Array(previous)
        }
        (previous, next) => anyhow::bail!("cannot combine {previous:?} with {next:?}"),
    })
}

fn add_numbers(previous: &serde_json::Number, next: &serde_json::Number) -> anyhow::Result<Value> {
    if let (Some(previous), Some(next)) = (previous.as_i64(), next.as_i64()) {
        let sum = previous
            .checked_add(next)
            .with_context(|| format!("integer overflow combining {previous} and {next}"))?;
        Ok(Value::from(sum))
    } else if let (Some(previous), Some(next)) = (previous.as_f64(), next.as_f64()) {
        Ok(Value::from(previous + next))
    } else {
        anyhow::bail!("cannot combine {previous} with {next}")
    }
}

/// Appends the next value to the accumulator as a list, creating a
/// single-element list on the first call.
pub fn collect(next: Value, previous: Option<Value>) -> anyhow::Result<Value> {
    Ok(match previous {
        None => Value::Array(vec![next]),
        Some(Value::Array(mut items)) => {
            items.push(next);
            Value::Array(items)
        }
        Some(other) => Value::Array(vec![other, next]),
    })
}

/// Concatenates list-valued layers; an alias for [`add`].
pub fn merge(next: Value, previous: Option<Value>) -> anyhow::Result<Value> {
    add(next, previous)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adding_values() {
        assert_eq!(add(5_u64.into(), None).unwrap(), 5_u64);
        assert_eq!(add(5_u64.into(), Some(6_u64.into())).unwrap(), 11_u64);
        assert_eq!(add((-5_i64).into(), Some(6_u64.into())).unwrap(), 1_u64);
        assert_eq!(
            add("b".into(), Some("a".into())).unwrap(),
            "ab"
        );

        let previous = Value::Array(vec![1_u64.into()]);
        let next = Value::Array(vec![2_u64.into()]);
        let combined = add(next, Some(previous.clone())).unwrap();
        assert_eq!(
            combined,
            Value::Array(vec![1_u64.into(), 2_u64.into()])
        );

        add("b".into(), Some(1_u64.into())).unwrap_err();
    }

    #[test]
    fn adding_preserves_falsy_values() {
        // An explicit absent marker means falsy accumulators are kept as-is.
        assert_eq!(add(0_u64.into(), None).unwrap(), 0_u64);
        assert_eq!(add(5_u64.into(), Some(0_u64.into())).unwrap(), 5_u64);
        assert_eq!(add("x".into(), Some("".into())).unwrap(), "x");
    }

    #[test]
    fn collecting_values() {
        let acc = collect(1_u64.into(), None).unwrap();
        assert_eq!(acc, Value::Array(vec![1_u64.into()]));
        let acc = collect(2_u64.into(), Some(acc)).unwrap();
        assert_eq!(acc, Value::Array(vec![1_u64.into(), 2_u64.into()]));
    }

    #[test]
    fn merging_lists() {
        let previous = Value::Array(vec![1_u64.into(), 2_u64.into()]);
        let next = Value::Array(vec![3_u64.into()]);
        let combined = merge(next, Some(previous)).unwrap();
        assert_eq!(
            combined,
            Value::Array(vec![1_u64.into(), 2_u64.into(), 3_u64.into()])
        );
    }
}
