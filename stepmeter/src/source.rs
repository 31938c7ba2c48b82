use std::{
    fmt,
    sync::{Arc, Weak},
};

type SampleFn = dyn Fn() -> Option<f64> + Send + Sync;

/// Where a function-backed meter reads its value from.
///
/// The caller chooses whether the registry keeps the state alive. A [`strong`](Self::strong)
/// source holds the state for as long as the meter exists; a [`weak`](Self::weak) source lets the
/// state go away, after which the source reads nothing and the meter reports `NaN` or is skipped.
#[derive(Clone)]
pub struct ValueSource {
    sample: Arc<SampleFn>,
    weak: bool,
}

impl ValueSource {
    /// Reads `f(&state)`, keeping `state` alive.
    pub fn strong<T, F>(state: Arc<T>, f: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn(&T) -> f64 + Send + Sync + 'static,
    {
        Self { sample: Arc::new(move || Some(f(&state))), weak: false }
    }

    /// Reads `f(&state)` for as long as someone else keeps `state` alive.
    pub fn weak<T, F>(state: &Arc<T>, f: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn(&T) -> f64 + Send + Sync + 'static,
    {
        let state: Weak<T> = Arc::downgrade(state);
        Self { sample: Arc::new(move || state.upgrade().map(|s| f(&s))), weak: true }
    }

    /// Reads a free-standing function.
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn() -> f64 + Send + Sync + 'static,
    {
        Self { sample: Arc::new(move || Some(f())), weak: false }
    }

    /// Current value, or `None` once a weakly held state has been dropped.
    pub fn sample(&self) -> Option<f64> {
        (self.sample)()
    }

    /// Current value, or `NaN` once a weakly held state has been dropped.
    pub fn value(&self) -> f64 {
        self.sample().unwrap_or(f64::NAN)
    }

    /// Whether this source holds its state weakly.
    pub fn is_weak(&self) -> bool {
        self.weak
    }
}

impl fmt::Debug for ValueSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValueSource").field("weak", &self.weak).finish_non_exhaustive()
    }
}
