use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use stepmeter_util::{DistributionConfig, SharedClock, SystemClock};
use tracing::{debug, info, warn};

use crate::{
    filter::{is_configurable, FilterReply, MeterFilter},
    Counter, CustomMeter, DistributionSummary, FunctionCounter, FunctionTimer, Gauge, Id, LongTaskTimer,
    Meter, MeterContext, MeterError, MeterKind, RegistryConfig, Statistic, TimeUnit, Timer, ValueSource,
};

type MeterMap = im::HashMap<Id, Meter>;
type FilterChain = Vec<Arc<dyn MeterFilter>>;

/// Holds every registered meter, keyed by identity.
///
/// Looking up a registered meter never takes a lock: the meter map is an immutable map swapped
/// in whole whenever it changes. Creating a meter takes the registration lock, so that concurrent
/// first registrations of one identity construct exactly one meter and all receive it.
///
/// Registration is where filters apply: the identity is mapped, admission is decided, and the
/// distribution configuration is resolved (the meter's own settings, then each filter, then the
/// registry defaults, with histogram expiry falling back to the step) before the factory runs.
pub struct MeterRegistry {
    meters: ArcSwap<MeterMap>,
    // Held while creating or removing meters. Maps a parent identity to the synthetic meters
    // derived from it.
    registration: Mutex<HashMap<Id, HashSet<Id>>>,
    filters: ArcSwap<FilterChain>,
    closed: AtomicBool,
    context: MeterContext,
}

impl MeterRegistry {
    /// Creates a new `MeterRegistry` reading time from the system clock.
    pub fn new(config: RegistryConfig) -> Self {
        Self::with_clock(config, SystemClock::shared())
    }

    /// Creates a new `MeterRegistry` reading time from `clock`.
    pub fn with_clock(config: RegistryConfig, clock: SharedClock) -> Self {
        Self {
            meters: ArcSwap::from_pointee(MeterMap::new()),
            registration: Mutex::new(HashMap::new()),
            filters: ArcSwap::from_pointee(FilterChain::new()),
            closed: AtomicBool::new(false),
            context: MeterContext::new(clock, config),
        }
    }

    /// Registry settings.
    pub fn config(&self) -> &RegistryConfig {
        self.context.config()
    }

    /// Clock the registry's meters read time from.
    pub fn clock(&self) -> &SharedClock {
        self.context.clock()
    }

    /// Context handed to meter factories.
    pub fn context(&self) -> &MeterContext {
        &self.context
    }

    /// Appends a filter to the chain.
    ///
    /// Filters only apply to registrations that happen after they are added.
    pub fn add_filter<F: MeterFilter + 'static>(&self, filter: F) {
        let filter: Arc<dyn MeterFilter> = Arc::new(filter);
        self.filters.rcu(|chain| {
            let mut chain = FilterChain::clone(chain);
            chain.push(Arc::clone(&filter));
            chain
        });

        let registered = self.len();
        if registered > 0 {
            warn!(
                registered,
                "filter added after meters were registered; it will not apply to those meters"
            );
        }
    }

    /// Registers a meter built by `factory`, or returns the meter already registered under the
    /// identity.
    ///
    /// The identity's [`kind`](Id::kind) must match what `factory` builds. Registering an
    /// identity that exists with another kind fails with [`MeterError::KindConflict`]. Denied
    /// identities, and every identity once the registry is closed, get a no-op meter.
    pub fn register<F>(&self, id: Id, factory: F) -> Result<Meter, MeterError>
    where
        F: FnOnce(&Id, &DistributionConfig, &MeterContext) -> Result<Meter, MeterError>,
    {
        self.register_with_config(id, DistributionConfig::new(), factory)
    }

    /// Like [`register`](Self::register), with the meter's own distribution configuration.
    pub fn register_with_config<F>(
        &self,
        id: Id,
        config: DistributionConfig,
        factory: F,
    ) -> Result<Meter, MeterError>
    where
        F: FnOnce(&Id, &DistributionConfig, &MeterContext) -> Result<Meter, MeterError>,
    {
        let requested = id.kind();
        if self.is_closed() {
            return Ok(Meter::noop(id));
        }

        let filters = self.filters.load_full();
        let id = filters.iter().fold(id, |id, filter| filter.map(id));

        if let Some(existing) = self.meters.load().get(&id) {
            return check_kind(existing, requested);
        }

        if !accepts(&filters, &id) {
            debug!(metric_name = id.name(), kind = %requested, "meter denied by filter");
            return Ok(Meter::noop(id));
        }

        let mut synthetics = self.registration.lock();
        if self.is_closed() {
            return Ok(Meter::noop(id));
        }
        // Someone may have won the race while we waited for the lock.
        if let Some(existing) = self.meters.load().get(&id) {
            return check_kind(existing, requested);
        }

        let config = if is_configurable(requested) {
            filters
                .iter()
                .fold(config, |config, filter| filter.configure(&id, config))
                .merge(self.context.config().distribution_defaults())
                .merge(&DistributionConfig::new().with_expiry(self.context.step()))
        } else {
            config
        };

        let meter = factory(&id, &config, &self.context)?;

        let mut meters = MeterMap::clone(&self.meters.load());
        meters.insert(id.clone(), meter.clone());
        self.meters.store(Arc::new(meters));

        if let Some(parent) = id.synthetic_association() {
            let parent = filters.iter().fold(parent.clone(), |parent, filter| filter.map(parent));
            synthetics.entry(parent).or_default().insert(id.clone());
        }

        debug!(metric_name = id.name(), kind = %requested, "registered meter");
        Ok(meter)
    }

    /// Registers a [`Counter`].
    pub fn counter(&self, id: Id) -> Result<Arc<Counter>, MeterError> {
        let id = id.with_kind(MeterKind::Counter);
        match self.register(id, |id, _, context| Ok(Meter::Counter(Arc::new(Counter::new(id.clone(), context)))))? {
            Meter::Counter(counter) => Ok(counter),
            other => Err(conflict(&other, MeterKind::Counter)),
        }
    }

    /// Registers a [`Gauge`] reading `source`.
    pub fn gauge(&self, id: Id, source: ValueSource) -> Result<Arc<Gauge>, MeterError> {
        let id = id.with_kind(MeterKind::Gauge);
        match self.register(id, |id, _, context| Ok(Meter::Gauge(Arc::new(Gauge::new(id.clone(), source, context)))))? {
            Meter::Gauge(gauge) => Ok(gauge),
            other => Err(conflict(&other, MeterKind::Gauge)),
        }
    }

    /// Registers a [`Timer`].
    ///
    /// Expected values left unset anywhere fall back to [`Timer::default_config`].
    pub fn timer(&self, id: Id, config: DistributionConfig) -> Result<Arc<Timer>, MeterError> {
        let id = id.with_kind(MeterKind::Timer);
        let meter = self.register_with_config(id, config, |id, config, context| {
            let config = config.clone().merge(&Timer::default_config());
            Ok(Meter::Timer(Arc::new(Timer::new(id.clone(), &config, context)?)))
        })?;
        match meter {
            Meter::Timer(timer) => Ok(timer),
            other => Err(conflict(&other, MeterKind::Timer)),
        }
    }

    /// Registers a [`DistributionSummary`].
    pub fn summary(&self, id: Id, config: DistributionConfig) -> Result<Arc<DistributionSummary>, MeterError> {
        let id = id.with_kind(MeterKind::DistributionSummary);
        let meter = self.register_with_config(id, config, |id, config, context| {
            Ok(Meter::DistributionSummary(Arc::new(DistributionSummary::new(id.clone(), config, context)?)))
        })?;
        match meter {
            Meter::DistributionSummary(summary) => Ok(summary),
            other => Err(conflict(&other, MeterKind::DistributionSummary)),
        }
    }

    /// Registers a [`LongTaskTimer`].
    ///
    /// Expected values left unset anywhere fall back to [`LongTaskTimer::default_config`].
    pub fn long_task_timer(&self, id: Id, config: DistributionConfig) -> Result<Arc<LongTaskTimer>, MeterError> {
        let id = id.with_kind(MeterKind::LongTaskTimer);
        let meter = self.register_with_config(id, config, |id, config, context| {
            config.validate().map_err(|source| MeterError::Histogram { id: id.to_string(), source })?;
            let config = config.clone().merge(&LongTaskTimer::default_config());
            Ok(Meter::LongTaskTimer(Arc::new(LongTaskTimer::new(id.clone(), &config, context))))
        })?;
        match meter {
            Meter::LongTaskTimer(timer) => Ok(timer),
            other => Err(conflict(&other, MeterKind::LongTaskTimer)),
        }
    }

    /// Registers a [`FunctionCounter`] reading `source`.
    pub fn function_counter(&self, id: Id, source: ValueSource) -> Result<Arc<FunctionCounter>, MeterError> {
        let id = id.with_kind(MeterKind::FunctionCounter);
        let meter = self.register(id, |id, _, context| {
            Ok(Meter::FunctionCounter(Arc::new(FunctionCounter::new(id.clone(), source, context))))
        })?;
        match meter {
            Meter::FunctionCounter(counter) => Ok(counter),
            other => Err(conflict(&other, MeterKind::FunctionCounter)),
        }
    }

    /// Registers a [`FunctionTimer`] reading a count and a total time given in `total_unit`.
    pub fn function_timer(
        &self,
        id: Id,
        count: ValueSource,
        total: ValueSource,
        total_unit: TimeUnit,
    ) -> Result<Arc<FunctionTimer>, MeterError> {
        let id = id.with_kind(MeterKind::FunctionTimer);
        let meter = self.register(id, |id, _, context| {
            Ok(Meter::FunctionTimer(Arc::new(FunctionTimer::new(id.clone(), count, total, total_unit, context))))
        })?;
        match meter {
            Meter::FunctionTimer(timer) => Ok(timer),
            other => Err(conflict(&other, MeterKind::FunctionTimer)),
        }
    }

    /// Registers a [`CustomMeter`] reporting `measurements`.
    pub fn custom(
        &self,
        id: Id,
        measurements: Vec<(Statistic, ValueSource)>,
    ) -> Result<Arc<CustomMeter>, MeterError> {
        let id = id.with_kind(MeterKind::Custom);
        let meter = self.register(id, |id, _, context| {
            Ok(Meter::Custom(Arc::new(CustomMeter::new(id.clone(), measurements, context))))
        })?;
        match meter {
            Meter::Custom(custom) => Ok(custom),
            other => Err(conflict(&other, MeterKind::Custom)),
        }
    }

    /// Meter registered under `id`. The identity is looked up as given, without filters.
    pub fn get(&self, id: &Id) -> Option<Meter> {
        self.meters.load().get(id).cloned()
    }

    /// Every registered meter, as of one instant.
    pub fn meters(&self) -> Vec<Meter> {
        self.meters.load().values().cloned().collect()
    }

    /// Registered meters named `name`, whatever their tags.
    pub fn find_by_name(&self, name: &str) -> Vec<Meter> {
        self.meters.load().iter().filter(|(id, _)| id.name() == name).map(|(_, meter)| meter.clone()).collect()
    }

    /// Number of registered meters.
    pub fn len(&self) -> usize {
        self.meters.load().len()
    }

    /// Whether no meters are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes the meter registered under `id`, along with every synthetic meter derived from it,
    /// closing each.
    ///
    /// Returns the removed meter, or `None` if nothing was registered under `id`.
    pub fn remove(&self, id: &Id) -> Option<Meter> {
        let mut synthetics = self.registration.lock();
        let removed = self.detach(id)?;

        if let Some(parent) = removed.id().synthetic_association() {
            // Children are keyed by their parent's identity after filtering, as at registration.
            let filters = self.filters.load();
            let parent = filters.iter().fold(parent.clone(), |parent, filter| filter.map(parent));
            if let Some(siblings) = synthetics.get_mut(&parent) {
                siblings.remove(id);
                if siblings.is_empty() {
                    synthetics.remove(&parent);
                }
            }
        }

        let mut visited = HashSet::from([id.clone()]);
        let mut pending: Vec<Id> = synthetics.remove(id).into_iter().flatten().collect();
        while let Some(child) = pending.pop() {
            if !visited.insert(child.clone()) {
                continue;
            }
            self.detach(&child);
            pending.extend(synthetics.remove(&child).into_iter().flatten());
        }

        Some(removed)
    }

    /// Like [`remove`](Self::remove), but maps `id` through the filters first, so that it can be
    /// called with the identity as it was originally registered.
    pub fn remove_by_pre_filter_id(&self, id: Id) -> Option<Meter> {
        let filters = self.filters.load();
        let id = filters.iter().fold(id, |id, filter| filter.map(id));
        self.remove(&id)
    }

    /// Removes and closes every meter.
    pub fn clear(&self) {
        let mut synthetics = self.registration.lock();
        let meters = self.meters.swap(Arc::new(MeterMap::new()));
        synthetics.clear();
        for meter in meters.values() {
            meter.close();
        }
        debug!(removed = meters.len(), "cleared registry");
    }

    /// Stops creating meters. Every later registration gets a no-op meter.
    ///
    /// Registered meters keep working; [`close_rollover`](Self::close_rollover) closes them.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            info!(meters = self.len(), "meter registry closed");
        }
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Rolls every meter over to the current step.
    ///
    /// Meters roll over on their own the first time they are touched after a step boundary.
    /// Pumping right after the boundary makes related meters agree on which step a measurement
    /// belongs to before anything reads them.
    pub fn pump_rollover(&self) {
        for meter in self.meters.load().values() {
            meter.rollover();
        }
    }

    /// Closes the step in progress on every meter, making it readable as the last step.
    pub fn close_rollover(&self) {
        for meter in self.meters.load().values() {
            meter.close();
        }
    }

    // Caller holds the registration lock.
    fn detach(&self, id: &Id) -> Option<Meter> {
        let current = self.meters.load_full();
        let meter = current.get(id)?.clone();
        let mut next = MeterMap::clone(&current);
        next.remove(id);
        self.meters.store(Arc::new(next));
        meter.close();
        debug!(metric_name = id.name(), kind = %meter.kind(), "removed meter");
        Some(meter)
    }
}

impl Default for MeterRegistry {
    fn default() -> Self {
        Self::new(RegistryConfig::default())
    }
}

impl std::fmt::Debug for MeterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MeterRegistry")
            .field("meters", &self.len())
            .field("filters", &self.filters.load().len())
            .field("closed", &self.is_closed())
            .field("context", &self.context)
            .finish()
    }
}

fn accepts(filters: &[Arc<dyn MeterFilter>], id: &Id) -> bool {
    filters
        .iter()
        .map(|filter| filter.accept(id))
        .find(|reply| *reply != FilterReply::Neutral)
        .map_or(true, |reply| reply == FilterReply::Accept)
}

fn check_kind(existing: &Meter, requested: MeterKind) -> Result<Meter, MeterError> {
    if existing.kind() == requested {
        Ok(existing.clone())
    } else {
        Err(conflict(existing, requested))
    }
}

fn conflict(existing: &Meter, requested: MeterKind) -> MeterError {
    warn!(
        metric_name = existing.id().name(),
        existing = %existing.kind(),
        requested = %requested,
        "meter kind conflict"
    );
    MeterError::KindConflict { id: existing.id().to_string(), existing: existing.kind(), requested }
}

#[cfg(test)]
mod tests {
    use super::MeterRegistry;
    use crate::{filter, Id, Meter, MeterError, MeterKind, RegistryConfig};
    use stepmeter_util::MockClock;
    use std::sync::Arc;

    fn registry() -> MeterRegistry {
        let (_mock, clock) = MockClock::shared();
        MeterRegistry::with_clock(RegistryConfig::new(), clock)
    }

    #[test]
    fn same_identity_same_meter() {
        let registry = registry();
        let a = registry.counter(Id::new("requests", [("uri", "/")])).unwrap();
        let b = registry.counter(Id::new("requests", [("uri", "/")])).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn kind_conflict_is_an_error() {
        let registry = registry();
        registry.counter(Id::named("jobs")).unwrap();
        match registry.timer(Id::named("jobs"), Default::default()) {
            Err(MeterError::KindConflict { existing, requested, .. }) => {
                assert_eq!(existing, MeterKind::Counter);
                assert_eq!(requested, MeterKind::Timer);
            }
            other => panic!("expected a kind conflict, got {other:?}"),
        }
    }

    #[test]
    fn denied_meters_are_noops_and_not_stored() {
        let registry = registry();
        registry.add_filter(filter::deny_name_prefix("jvm"));
        let counter = registry.counter(Id::named("jvm.threads")).unwrap();
        counter.increment();
        assert!(counter.is_noop());
        assert!(registry.is_empty());
    }

    #[test]
    fn mapped_identity_is_what_gets_stored() {
        let registry = registry();
        registry.add_filter(filter::common_tags([("region", "eu")]));
        let counter = registry.counter(Id::named("logins")).unwrap();
        assert_eq!(counter.id().tag("region"), Some("eu"));
        assert!(registry.get(&Id::new("logins", [("region", "eu")])).is_some());
        assert!(registry.remove_by_pre_filter_id(Id::named("logins")).is_some());
        assert!(registry.is_empty());
    }

    #[test]
    fn removal_cascades_to_synthetic_meters() {
        let registry = registry();
        let parent = Id::named("http.server.requests");
        registry.timer(parent.clone(), Default::default()).unwrap();
        registry.counter(Id::named("http.server.requests.count").with_synthetic_association(&parent)).unwrap();
        registry.counter(Id::named("unrelated")).unwrap();
        assert_eq!(registry.len(), 3);

        let removed = registry.remove(&parent).unwrap();
        assert!(matches!(removed, Meter::Timer(_)));
        assert_eq!(registry.len(), 1);
        assert!(registry.remove(&parent).is_none());
    }

    #[test]
    fn removing_a_child_forgets_its_filtered_parent() {
        let registry = registry();
        registry.add_filter(filter::common_tags([("region", "eu")]));
        let parent = Id::named("http.server.requests");
        let child = Id::named("http.server.requests.count").with_synthetic_association(&parent);
        registry.timer(parent.clone(), Default::default()).unwrap();
        let counter = registry.counter(child).unwrap();
        assert_eq!(registry.registration.lock().len(), 1);

        assert!(registry.remove(counter.id()).is_some());
        assert!(registry.registration.lock().is_empty());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn closed_registry_hands_out_noops() {
        let registry = registry();
        let live = registry.counter(Id::named("before")).unwrap();
        registry.close();
        assert!(registry.is_closed());

        let late = registry.counter(Id::named("after")).unwrap();
        assert!(late.is_noop());
        assert_eq!(registry.len(), 1);

        live.increment();
        assert_eq!(live.count(), 1.0);
    }

    #[test]
    fn invalid_distribution_configuration_is_rejected() {
        let registry = registry();
        let config = stepmeter_util::DistributionConfig::new().with_buffer_length(0).with_percentiles([0.5]);
        assert!(matches!(
            registry.summary(Id::named("sizes"), config),
            Err(MeterError::Histogram { .. })
        ));
        assert!(registry.is_empty());
    }
}
