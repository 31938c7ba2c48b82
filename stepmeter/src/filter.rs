//! Meter filters.
//!
//! A registry runs every registration through its filters, in the order they were added:
//! - [`MeterFilter::map`] rewrites the identity, for example to add common tags;
//! - [`MeterFilter::accept`] lets a filter admit or reject the identity, the first filter with an
//!   opinion deciding;
//! - [`MeterFilter::configure`] adjusts the distribution configuration of timers and summaries.
//!
//! Rejected identities get a no-op meter that is never stored.
use std::collections::HashSet;

use aho_corasick::{AhoCorasick, AhoCorasickBuilder, AhoCorasickKind};
use parking_lot::Mutex;
use stepmeter_util::DistributionConfig;

use crate::{Id, MeterError, MeterKind, MeterKindMask, SharedString, Tag, Tags};

/// A filter's verdict on an identity.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilterReply {
    /// Register the meter without asking later filters.
    Accept,
    /// Hand out a no-op meter without asking later filters.
    Deny,
    /// Defer to later filters. An identity nobody objects to is registered.
    Neutral,
}

/// Rewrites, admits and configures meters as they are registered.
pub trait MeterFilter: Send + Sync {
    /// Rewrites the identity. Runs before [`accept`](Self::accept).
    fn map(&self, id: Id) -> Id {
        id
    }

    /// Decides whether the identity is registered.
    fn accept(&self, _id: &Id) -> FilterReply {
        FilterReply::Neutral
    }

    /// Adjusts the distribution configuration of the meter being registered.
    fn configure(&self, _id: &Id, config: DistributionConfig) -> DistributionConfig {
        config
    }
}

struct MapFilter<F>(F);

impl<F> MeterFilter for MapFilter<F>
where
    F: Fn(Id) -> Id + Send + Sync,
{
    fn map(&self, id: Id) -> Id {
        (self.0)(id)
    }
}

struct AcceptFilter<F>(F);

impl<F> MeterFilter for AcceptFilter<F>
where
    F: Fn(&Id) -> FilterReply + Send + Sync,
{
    fn accept(&self, id: &Id) -> FilterReply {
        (self.0)(id)
    }
}

struct ConfigureFilter<F>(F);

impl<F> MeterFilter for ConfigureFilter<F>
where
    F: Fn(&Id, DistributionConfig) -> DistributionConfig + Send + Sync,
{
    fn configure(&self, id: &Id, config: DistributionConfig) -> DistributionConfig {
        (self.0)(id, config)
    }
}

/// A filter that only rewrites identities.
pub fn map_fn<F>(f: F) -> impl MeterFilter
where
    F: Fn(Id) -> Id + Send + Sync,
{
    MapFilter(f)
}

/// A filter that only decides admission.
pub fn accept_fn<F>(f: F) -> impl MeterFilter
where
    F: Fn(&Id) -> FilterReply + Send + Sync,
{
    AcceptFilter(f)
}

/// A filter that only adjusts distribution configuration.
pub fn configure_fn<F>(f: F) -> impl MeterFilter
where
    F: Fn(&Id, DistributionConfig) -> DistributionConfig + Send + Sync,
{
    ConfigureFilter(f)
}

/// Adds `tags` to every identity. Tags the identity already has keep their values.
pub fn common_tags<I, T>(tags: I) -> impl MeterFilter
where
    I: IntoIterator<Item = T>,
    T: Into<Tag>,
{
    let common = Tags::of(tags);
    map_fn(move |id: Id| {
        let own = id.tags().clone();
        id.with_tags(common.clone().and(own))
    })
}

/// Renames the tag `from` to `to` on identities whose name starts with `name_prefix`.
pub fn rename_tag<P, K, R>(name_prefix: P, from: K, to: R) -> impl MeterFilter
where
    P: Into<String>,
    K: Into<String>,
    R: Into<SharedString>,
{
    let (prefix, from, to) = (name_prefix.into(), from.into(), to.into());
    map_fn(move |id: Id| {
        if !id.name().starts_with(prefix.as_str()) || id.tag(&from).is_none() {
            return id;
        }
        let tags = id
            .tags()
            .iter()
            .map(|tag| if tag.key() == from { Tag::new(to.clone(), tag.value().to_owned()) } else { tag.clone() })
            .collect();
        id.with_tags(tags)
    })
}

/// Drops the given tag keys from every identity.
pub fn ignore_tags<I, K>(keys: I) -> impl MeterFilter
where
    I: IntoIterator<Item = K>,
    K: Into<String>,
{
    let keys: HashSet<String> = keys.into_iter().map(Into::into).collect();
    map_fn(move |id: Id| {
        if !id.tags().iter().any(|tag| keys.contains(tag.key())) {
            return id;
        }
        let tags = id.tags().iter().filter(|tag| !keys.contains(tag.key())).cloned().collect();
        id.with_tags(tags)
    })
}

/// Rewrites the values of the tag `key` with `replacement`, except for values in `exceptions`.
///
/// Useful for collapsing a high-cardinality tag into a handful of values.
pub fn replace_tag_values<K, F, I, E>(key: K, replacement: F, exceptions: I) -> impl MeterFilter
where
    K: Into<String>,
    F: Fn(&str) -> String + Send + Sync,
    I: IntoIterator<Item = E>,
    E: Into<String>,
{
    let key = key.into();
    let exceptions: HashSet<String> = exceptions.into_iter().map(Into::into).collect();
    map_fn(move |id: Id| {
        let Some(value) = id.tag(&key) else {
            return id;
        };
        if exceptions.contains(value) {
            return id;
        }
        let replaced = replacement(value);
        id.and_tags([(key.clone(), replaced)])
    })
}

/// Accepts identities matching `predicate`, deferring on the rest.
pub fn accept<F>(predicate: F) -> impl MeterFilter
where
    F: Fn(&Id) -> bool + Send + Sync,
{
    accept_fn(move |id| if predicate(id) { FilterReply::Accept } else { FilterReply::Neutral })
}

/// Denies identities matching `predicate`, deferring on the rest.
pub fn deny<F>(predicate: F) -> impl MeterFilter
where
    F: Fn(&Id) -> bool + Send + Sync,
{
    accept_fn(move |id| if predicate(id) { FilterReply::Deny } else { FilterReply::Neutral })
}

/// Denies every identity that does not match `predicate`.
pub fn deny_unless<F>(predicate: F) -> impl MeterFilter
where
    F: Fn(&Id) -> bool + Send + Sync,
{
    accept_fn(move |id| if predicate(id) { FilterReply::Neutral } else { FilterReply::Deny })
}

/// Accepts identities whose name starts with `prefix`.
pub fn accept_name_prefix<P: Into<String>>(prefix: P) -> impl MeterFilter {
    let prefix = prefix.into();
    accept(move |id| id.name().starts_with(prefix.as_str()))
}

/// Denies identities whose name starts with `prefix`.
pub fn deny_name_prefix<P: Into<String>>(prefix: P) -> impl MeterFilter {
    let prefix = prefix.into();
    deny(move |id| id.name().starts_with(prefix.as_str()))
}

/// Denies identities whose name contains any of `patterns`.
///
/// Patterns are matched as substrings with an [Aho-Corasick][ahocorasick] automaton, so many
/// patterns cost about as much as one.
///
/// [ahocorasick]: https://en.wikipedia.org/wiki/Aho–Corasick_algorithm
pub fn deny_name_patterns<P, I>(patterns: P, case_insensitive: bool) -> Result<impl MeterFilter, MeterError>
where
    P: IntoIterator<Item = I>,
    I: AsRef<str>,
{
    let patterns: Vec<String> = patterns.into_iter().map(|p| p.as_ref().to_owned()).collect();
    let automaton: AhoCorasick = AhoCorasickBuilder::new()
        .ascii_case_insensitive(case_insensitive)
        .kind(Some(AhoCorasickKind::DFA))
        .build(&patterns)
        .map_err(|e| MeterError::InvalidConfiguration {
            key: "deny_name_patterns".to_owned(),
            value: patterns.join(","),
            reason: e.to_string(),
        })?;
    Ok(deny(move |id| automaton.is_match(id.name())))
}

/// Denies meters of the kinds in `mask`.
pub fn deny_kinds(mask: MeterKindMask) -> impl MeterFilter {
    deny(move |id| mask.matches(id.kind()))
}

/// Caps the expected value of distributions whose name starts with `name_prefix`.
///
/// Timers record nanoseconds, so a timer's maximum is given in nanoseconds.
pub fn max_expected<P: Into<String>>(name_prefix: P, max: f64) -> impl MeterFilter {
    let prefix = name_prefix.into();
    configure_fn(move |id, config| {
        if id.name().starts_with(prefix.as_str()) {
            DistributionConfig::new().with_maximum_expected_value(max).merge(&config)
        } else {
            config
        }
    })
}

/// Floors the expected value of distributions whose name starts with `name_prefix`.
///
/// Timers record nanoseconds, so a timer's minimum is given in nanoseconds.
pub fn min_expected<P: Into<String>>(name_prefix: P, min: f64) -> impl MeterFilter {
    let prefix = name_prefix.into();
    configure_fn(move |id, config| {
        if id.name().starts_with(prefix.as_str()) {
            DistributionConfig::new().with_minimum_expected_value(min).merge(&config)
        } else {
            config
        }
    })
}

/// Limits how many distinct values the tag `key` takes across meters whose name starts with
/// `name_prefix`. Once the limit is reached, identities with a new value are denied.
pub fn max_allowable_tags<P, K>(name_prefix: P, key: K, max_values: usize) -> impl MeterFilter
where
    P: Into<String>,
    K: Into<String>,
{
    CardinalityGuard {
        prefix: name_prefix.into(),
        key: key.into(),
        max_values,
        seen: Mutex::new(HashSet::new()),
    }
}

struct CardinalityGuard {
    prefix: String,
    key: String,
    max_values: usize,
    seen: Mutex<HashSet<String>>,
}

impl MeterFilter for CardinalityGuard {
    fn accept(&self, id: &Id) -> FilterReply {
        if !id.name().starts_with(self.prefix.as_str()) {
            return FilterReply::Neutral;
        }
        let Some(value) = id.tag(&self.key) else {
            return FilterReply::Neutral;
        };

        let mut seen = self.seen.lock();
        if seen.contains(value) {
            return FilterReply::Neutral;
        }
        if seen.len() >= self.max_values {
            tracing::warn!(
                metric_name = id.name(),
                tag = self.key.as_str(),
                max_values = self.max_values,
                "tag value limit reached; denying meter"
            );
            return FilterReply::Deny;
        }
        seen.insert(value.to_owned());
        FilterReply::Neutral
    }
}

/// Returns whether `kind` records distributions that filters may configure.
pub(crate) fn is_configurable(kind: MeterKind) -> bool {
    matches!(kind, MeterKind::Timer | MeterKind::DistributionSummary | MeterKind::LongTaskTimer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn common_tags_never_override_the_meters_own() {
        let filter = common_tags([("region", "us-east"), ("host", "a")]);
        let id = filter.map(Id::new("requests", [("host", "b")]));
        assert_eq!(id.tag("region"), Some("us-east"));
        assert_eq!(id.tag("host"), Some("b"));
    }

    #[test]
    fn tag_rewrites() {
        let renamed = rename_tag("http", "status", "code").map(Id::new("http.requests", [("status", "200")]));
        assert_eq!(renamed.tag("code"), Some("200"));
        assert_eq!(renamed.tag("status"), None);

        let untouched = rename_tag("http", "status", "code").map(Id::new("db.calls", [("status", "ok")]));
        assert_eq!(untouched.tag("status"), Some("ok"));

        let ignored = ignore_tags(["user"]).map(Id::new("logins", [("user", "ann"), ("method", "sso")]));
        assert_eq!(ignored.tags().len(), 1);

        let replaced = replace_tag_values("uri", |_| "other".to_owned(), ["/health"]);
        assert_eq!(replaced.map(Id::new("http", [("uri", "/users/42")])).tag("uri"), Some("other"));
        assert_eq!(replaced.map(Id::new("http", [("uri", "/health")])).tag("uri"), Some("/health"));
    }

    #[test]
    fn admission_filters() {
        let id = Id::named("jvm.gc.pause").with_kind(MeterKind::Timer);
        assert_eq!(deny_name_prefix("jvm").accept(&id), FilterReply::Deny);
        assert_eq!(accept_name_prefix("jvm").accept(&id), FilterReply::Accept);
        assert_eq!(deny_unless(|id: &Id| id.name().starts_with("http")).accept(&id), FilterReply::Deny);
        assert_eq!(deny_kinds(MeterKindMask::TIMER).accept(&id), FilterReply::Deny);
        assert_eq!(deny_kinds(MeterKindMask::COUNTER).accept(&id), FilterReply::Neutral);

        let patterns = deny_name_patterns(["GC", "heap"], true).unwrap();
        assert_eq!(patterns.accept(&id), FilterReply::Deny);
        assert_eq!(patterns.accept(&Id::named("http.requests")), FilterReply::Neutral);
    }

    #[test]
    fn expected_range_overrides_win() {
        let id = Id::named("http.latency");
        let configured = max_expected("http", 5e9)
            .configure(&id, DistributionConfig::new().with_maximum_expected_value(1e12));
        assert_eq!(configured.maximum_expected_value(), 5e9);

        let floor = min_expected("http", 1e3).configure(&id, DistributionConfig::new());
        assert_eq!(floor.minimum_expected_value(), 1e3);
    }

    #[test]
    fn cardinality_guard_denies_new_values_past_the_limit() {
        let guard = max_allowable_tags("http", "uri", 2);
        let with_uri = |uri: &'static str| Id::new("http.requests", [("uri", uri)]);

        assert_eq!(guard.accept(&with_uri("/a")), FilterReply::Neutral);
        assert_eq!(guard.accept(&with_uri("/b")), FilterReply::Neutral);
        assert_eq!(guard.accept(&with_uri("/a")), FilterReply::Neutral);
        assert_eq!(guard.accept(&with_uri("/c")), FilterReply::Deny);
        assert_eq!(guard.accept(&Id::new("db.calls", [("uri", "/c")])), FilterReply::Neutral);
    }
}
