//! Named functions for generated series and value post-processing.
//!
//! Function datasources produce samples locally with a [`SeriesFn`]
//! `f(time, prev_value)`. Any data key may name a [`PostProcessFn`]
//! `f(time, value, prev_value, prev_orig_time, prev_orig_value)` that rewrites
//! each value before it reaches listeners.

use crate::value::DataValue;
use crate::window::TimestampMs;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

/// Generator: `(time, previous value) -> value`.
pub type SeriesFn = Rc<dyn Fn(TimestampMs, &DataValue) -> DataValue>;

/// Post-processor: `(time, value, prev value, prev original time, prev original value) -> value`.
pub type PostProcessFn = Rc<dyn Fn(TimestampMs, &DataValue, &DataValue, TimestampMs, &DataValue) -> DataValue>;

#[derive(Clone, Default)]
pub struct FunctionRegistry {
    generators: HashMap<String, SeriesFn>,
    post_processors: HashMap<String, PostProcessFn>,
}

impl FunctionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a generator, replacing any previous one with the same name.
    pub fn register_generator<F>(&mut self, name: impl Into<String>, f: F) -> &mut Self
    where
        F: Fn(TimestampMs, &DataValue) -> DataValue + 'static,
    {
        self.generators.insert(name.into(), Rc::new(f));
        self
    }

    pub fn register_post_processor<F>(&mut self, name: impl Into<String>, f: F) -> &mut Self
    where
        F: Fn(TimestampMs, &DataValue, &DataValue, TimestampMs, &DataValue) -> DataValue + 'static,
    {
        self.post_processors.insert(name.into(), Rc::new(f));
        self
    }

    #[must_use]
    pub fn generator(&self, name: &str) -> Option<SeriesFn> {
        self.generators.get(name).cloned()
    }

    #[must_use]
    pub fn post_processor(&self, name: &str) -> Option<PostProcessFn> {
        self.post_processors.get(name).cloned()
    }
}

impl fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut generators: Vec<_> = self.generators.keys().collect();
        generators.sort();
        let mut post_processors: Vec<_> = self.post_processors.keys().collect();
        post_processors.sort();
        f.debug_struct("FunctionRegistry")
            .field("generators", &generators)
            .field("post_processors", &post_processors)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_by_name() {
        let mut reg = FunctionRegistry::new();
        reg.register_generator("counter", |_, prev| DataValue::Number(prev.to_number() + 1.0))
            .register_post_processor("double", |_, v, _, _, _| DataValue::Number(v.to_number() * 2.0));

        let counter = reg.generator("counter").unwrap();
        assert_eq!(counter(0, &DataValue::Number(4.0)), DataValue::Number(5.0));
        let double = reg.post_processor("double").unwrap();
        assert_eq!(double(0, &DataValue::Number(4.0), &DataValue::default(), 0, &DataValue::default()), DataValue::Number(8.0));
        assert!(reg.generator("missing").is_none());
    }
}
