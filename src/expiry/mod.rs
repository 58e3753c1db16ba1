pub mod pacer;
pub mod timer_wheel;

use std::time::Duration;

use crate::error::{BoxError, CacheError};
use crate::store::entry::{Entry, NEVER};

/// Determines how long each cache entry lives.
///
/// Returning `Ok(None)` means the entry does not expire.  `now` is the
/// cache ticker's reading in nanoseconds; `current` is the entry's remaining
/// lifetime (`None` if it had none).  A returned error aborts the triggering
/// operation without changing the cache.
pub trait Expiry<K, V>: Send + Sync + 'static {
    /// Called when an entry is created (or an in-flight value completes).
    fn expire_after_create(&self, key: &K, value: &V, now: u64) -> Result<Option<Duration>, BoxError>;

    /// Called when an entry's value is replaced.  Defaults to keeping the
    /// remaining lifetime.
    fn expire_after_update(
        &self,
        key: &K,
        value: &V,
        now: u64,
        current: Option<Duration>,
    ) -> Result<Option<Duration>, BoxError> {
        let _ = (key, value, now);
        Ok(current)
    }

    /// Called when an entry is read.  Defaults to keeping the remaining
    /// lifetime.
    fn expire_after_read(
        &self,
        key: &K,
        value: &V,
        now: u64,
        current: Option<Duration>,
    ) -> Result<Option<Duration>, BoxError> {
        let _ = (key, value, now);
        Ok(current)
    }
}

/// Every entry expires a fixed duration after it was created or last updated.
pub struct FixedTtl(pub Duration);

impl<K, V> Expiry<K, V> for FixedTtl {
    fn expire_after_create(&self, _key: &K, _value: &V, _now: u64) -> Result<Option<Duration>, BoxError> {
        Ok(Some(self.0))
    }

    fn expire_after_update(
        &self,
        _key: &K,
        _value: &V,
        _now: u64,
        _current: Option<Duration>,
    ) -> Result<Option<Duration>, BoxError> {
        Ok(Some(self.0))
    }
}

/// Entries expire a fixed duration after the last create, update or read.
pub struct FixedTti(pub Duration);

impl<K, V> Expiry<K, V> for FixedTti {
    fn expire_after_create(&self, _key: &K, _value: &V, _now: u64) -> Result<Option<Duration>, BoxError> {
        Ok(Some(self.0))
    }

    fn expire_after_update(
        &self,
        _key: &K,
        _value: &V,
        _now: u64,
        _current: Option<Duration>,
    ) -> Result<Option<Duration>, BoxError> {
        Ok(Some(self.0))
    }

    fn expire_after_read(
        &self,
        _key: &K,
        _value: &V,
        _now: u64,
        _current: Option<Duration>,
    ) -> Result<Option<Duration>, BoxError> {
        Ok(Some(self.0)) // reset the countdown on every read
    }
}

#[inline]
pub(crate) fn to_nanos(d: Duration) -> u64 {
    u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)
}

// ---------------------------------------------------------------------------
// ExpirationPolicy
// ---------------------------------------------------------------------------

/// The configured expiration rules, evaluated against an entry's timestamps.
///
/// Any combination may be active; an entry's deadline is the earliest of the
/// configured ones.
pub(crate) struct ExpirationPolicy<K, V> {
    after_write: Option<u64>,
    after_access: Option<u64>,
    variable: Option<Box<dyn Expiry<K, V>>>,
}

impl<K: 'static, V: 'static> ExpirationPolicy<K, V> {
    pub fn new(
        after_write: Option<Duration>,
        after_access: Option<Duration>,
        variable: Option<Box<dyn Expiry<K, V>>>,
    ) -> Self {
        ExpirationPolicy {
            after_write: after_write.map(to_nanos),
            after_access: after_access.map(to_nanos),
            variable,
        }
    }

    /// `true` if reads move deadlines.
    #[inline]
    pub fn tracks_access(&self) -> bool {
        self.after_access.is_some() || self.variable.is_some()
    }

    /// The absolute instant the entry expires at, if it ever does.
    pub fn deadline(&self, entry: &Entry<K, V>) -> Option<u64> {
        let mut deadline: Option<u64> = None;
        let mut consider = |at: u64| deadline = Some(deadline.map_or(at, |d| d.min(at)));
        if let Some(ttl) = self.after_write {
            consider(entry.write_time().saturating_add(ttl));
        }
        if let Some(tti) = self.after_access {
            consider(entry.access_time().saturating_add(tti));
        }
        if self.variable.is_some() {
            let at = entry.variable_time();
            if at != NEVER {
                consider(at);
            }
        }
        deadline
    }

    /// An in-flight entry never expires.
    #[inline]
    pub fn is_expired(&self, entry: &Entry<K, V>, now: u64) -> bool {
        entry.is_ready() && self.deadline(entry).is_some_and(|at| now >= at)
    }

    /// Time left before the variable deadline, as seen by `Expiry` callbacks.
    fn remaining(entry: &Entry<K, V>, now: u64) -> Option<Duration> {
        let at = entry.variable_time();
        (at != NEVER).then(|| Duration::from_nanos(at.saturating_sub(now)))
    }

    fn absolute(now: u64, lifetime: Option<Duration>) -> u64 {
        lifetime.map_or(NEVER, |d| now.saturating_add(to_nanos(d)).min(NEVER - 1))
    }

    /// The variable deadline for a value about to be written at `now`.
    ///
    /// `previous` is the live entry being replaced, if any.
    pub fn variable_on_write(
        &self,
        key: &K,
        value: &V,
        now: u64,
        previous: Option<&Entry<K, V>>,
    ) -> Result<u64, CacheError> {
        let Some(expiry) = &self.variable else {
            return Ok(NEVER);
        };
        let lifetime = match previous {
            Some(old) if old.is_ready() => {
                expiry.expire_after_update(key, value, now, Self::remaining(old, now))
            }
            _ => expiry.expire_after_create(key, value, now),
        }
        .map_err(CacheError::expiry)?;
        Ok(Self::absolute(now, lifetime))
    }

    /// Applies a read at `now`.  On error nothing is changed.
    pub fn record_read(&self, entry: &Entry<K, V>, value: &V, now: u64) -> Result<(), CacheError> {
        if !self.tracks_access() || !entry.is_ready() {
            return Ok(());
        }
        if let Some(expiry) = &self.variable {
            let lifetime = expiry
                .expire_after_read(entry.key(), value, now, Self::remaining(entry, now))
                .map_err(CacheError::expiry)?;
            entry.set_variable_time(Self::absolute(now, lifetime));
        }
        entry.set_access_time(now);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::future::ValueFuture;

    const S: u64 = 1_000_000_000;

    fn entry_at(now: u64, variable: u64) -> Entry<&'static str, u32> {
        Entry::ready("k", ValueFuture::completed(1), 1, now, variable, 1)
    }

    struct Failing;

    impl Expiry<&'static str, u32> for Failing {
        fn expire_after_create(&self, _: &&'static str, _: &u32, _: u64) -> Result<Option<Duration>, BoxError> {
            Err("no".into())
        }

        fn expire_after_read(
            &self,
            _: &&'static str,
            _: &u32,
            _: u64,
            _: Option<Duration>,
        ) -> Result<Option<Duration>, BoxError> {
            Err("no".into())
        }
    }

    #[test]
    fn earliest_configured_deadline_wins() {
        let policy: ExpirationPolicy<&str, u32> = ExpirationPolicy::new(
            Some(Duration::from_secs(60)),
            Some(Duration::from_secs(10)),
            None,
        );
        let entry = entry_at(0, NEVER);
        assert_eq!(policy.deadline(&entry), Some(10 * S));
        assert!(!policy.is_expired(&entry, 10 * S - 1));
        assert!(policy.is_expired(&entry, 10 * S));

        entry.set_access_time(55 * S);
        assert_eq!(policy.deadline(&entry), Some(60 * S));
    }

    #[test]
    fn no_rules_means_no_deadline() {
        let policy: ExpirationPolicy<&str, u32> = ExpirationPolicy::new(None, None, None);
        assert_eq!(policy.deadline(&entry_at(0, NEVER)), None);
        assert!(!policy.is_expired(&entry_at(0, NEVER), u64::MAX));
    }

    #[test]
    fn pending_entries_never_expire() {
        let policy: ExpirationPolicy<&str, u32> =
            ExpirationPolicy::new(Some(Duration::ZERO), None, None);
        let entry: Entry<&str, u32> = Entry::pending("k", ValueFuture::new(), 1, 0);
        assert!(!policy.is_expired(&entry, 100 * S));
    }

    #[test]
    fn variable_create_update_and_read() {
        let policy: ExpirationPolicy<&str, u32> =
            ExpirationPolicy::new(None, None, Some(Box::new(FixedTti(Duration::from_secs(5)))));
        assert_eq!(policy.variable_on_write(&"k", &1, 2 * S, None).unwrap(), 7 * S);

        let entry = entry_at(0, 7 * S);
        assert_eq!(policy.variable_on_write(&"k", &2, 3 * S, Some(&entry)).unwrap(), 8 * S);

        policy.record_read(&entry, &1, 4 * S).unwrap();
        assert_eq!(entry.variable_time(), 9 * S);
        assert_eq!(entry.access_time(), 4 * S);
    }

    #[test]
    fn failing_callback_changes_nothing() {
        let policy: ExpirationPolicy<&str, u32> = ExpirationPolicy::new(None, None, Some(Box::new(Failing)));
        assert!(matches!(
            policy.variable_on_write(&"k", &1, 0, None),
            Err(CacheError::Expiry(_))
        ));

        let entry = entry_at(0, 5 * S);
        assert!(policy.record_read(&entry, &1, S).is_err());
        assert_eq!(entry.variable_time(), 5 * S);
        assert_eq!(entry.access_time(), 0);
    }
}
