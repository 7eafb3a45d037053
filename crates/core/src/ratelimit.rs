//! In-process fixed-window rate limiting.
//!
//! Fixed-window counting, not a true sliding window: a burst straddling a
//! window boundary can admit up to twice the ceiling. Callers size their
//! ceilings expecting that, so the semantics must not be silently tightened.
//!
//! The limiter is the only shared mutable state in the orchestration core.
//! Construct one instance at startup and share it by `Arc`; tests build
//! isolated instances per case.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::domain::{TenantId, UserId};
use crate::errors::GatewayError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LimitScope {
    PerUser,
    PerTenant,
}

/// A fixed ceiling for one operation. Not tenant-configurable.
#[derive(Clone, Copy, Debug)]
pub struct LimitPolicy {
    pub name: &'static str,
    pub max_requests: u32,
    pub window: Duration,
    pub scope: LimitScope,
}

impl LimitPolicy {
    pub const CHAT: Self = Self {
        name: "chat",
        max_requests: 30,
        window: Duration::from_secs(60),
        scope: LimitScope::PerUser,
    };
    pub const EMAIL_DRAFT: Self = Self {
        name: "email_draft",
        max_requests: 10,
        window: Duration::from_secs(60),
        scope: LimitScope::PerUser,
    };
    pub const INSIGHTS: Self = Self {
        name: "insights",
        max_requests: 5,
        window: Duration::from_secs(60),
        scope: LimitScope::PerTenant,
    };
    pub const CONNECTION_TEST: Self = Self {
        name: "connection_test",
        max_requests: 5,
        window: Duration::from_secs(60),
        scope: LimitScope::PerTenant,
    };
    pub const DOCUMENT_SEARCH: Self = Self {
        name: "document_search",
        max_requests: 20,
        window: Duration::from_secs(60),
        scope: LimitScope::PerUser,
    };

    fn key_for(&self, tenant: &TenantId, user: &UserId) -> String {
        match self.scope {
            LimitScope::PerUser => format!("{}:{}:{}", self.name, tenant.0, user.0),
            LimitScope::PerTenant => format!("{}:{}", self.name, tenant.0),
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct WindowEntry {
    count: u32,
    reset_at: Instant,
}

pub struct RateLimiter {
    entries: Mutex<HashMap<String, WindowEntry>>,
    last_sweep: Mutex<Instant>,
    sweep_interval: Duration,
}

impl RateLimiter {
    pub fn new(sweep_interval: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            last_sweep: Mutex::new(Instant::now()),
            sweep_interval,
        }
    }

    /// Admit or reject one request for `key`. Synchronous and non-blocking;
    /// the check-then-increment happens under one lock so concurrent callers
    /// can never push a live window past `max_requests`.
    pub fn check(&self, key: &str, max_requests: u32, window: Duration) -> bool {
        self.admit(key, max_requests, window).is_ok()
    }

    /// Policy-level check used by the orchestrator; the composite key follows
    /// the policy scope.
    pub fn check_policy(
        &self,
        policy: &LimitPolicy,
        tenant: &TenantId,
        user: &UserId,
    ) -> Result<(), GatewayError> {
        let key = policy.key_for(tenant, user);
        self.admit(&key, policy.max_requests, policy.window).map_err(|retry_after| {
            GatewayError::RateLimitExceeded {
                operation: policy.name,
                retry_after_secs: retry_after_secs(retry_after),
            }
        })
    }

    fn admit(&self, key: &str, max_requests: u32, window: Duration) -> Result<(), Duration> {
        let now = Instant::now();
        self.maybe_sweep(now);

        let mut entries = lock_unpoisoned(&self.entries);
        match entries.get_mut(key) {
            Some(entry) if now < entry.reset_at => {
                if entry.count >= max_requests {
                    return Err(entry.reset_at - now);
                }
                entry.count += 1;
                Ok(())
            }
            _ => {
                entries
                    .insert(key.to_string(), WindowEntry { count: 1, reset_at: now + window });
                Ok(())
            }
        }
    }

    /// Opportunistic cleanup: runs at most once per sweep interval, piggybacked
    /// on whichever check happens to cross the threshold, and drops every
    /// expired entry regardless of key. Bounds memory without a background
    /// scheduler.
    fn maybe_sweep(&self, now: Instant) {
        {
            let mut last_sweep = lock_unpoisoned(&self.last_sweep);
            if now.duration_since(*last_sweep) < self.sweep_interval {
                return;
            }
            *last_sweep = now;
        }
        let mut entries = lock_unpoisoned(&self.entries);
        entries.retain(|_, entry| entry.reset_at > now);
    }

    #[cfg(test)]
    fn entry_count(&self) -> usize {
        lock_unpoisoned(&self.entries).len()
    }
}

fn lock_unpoisoned<'a, T>(mutex: &'a Mutex<T>) -> std::sync::MutexGuard<'a, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn retry_after_secs(retry_after: Duration) -> u64 {
    let secs = retry_after.as_secs();
    if retry_after.subsec_nanos() > 0 {
        secs + 1
    } else {
        secs.max(1)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use crate::domain::{TenantId, UserId};
    use crate::errors::GatewayError;
    use crate::ratelimit::{LimitPolicy, LimitScope, RateLimiter};

    fn limiter() -> RateLimiter {
        RateLimiter::new(Duration::from_secs(300))
    }

    #[test]
    fn sixth_request_within_the_window_is_rejected() {
        let limiter = limiter();
        for _ in 0..5 {
            assert!(limiter.check("insights:org-1", 5, Duration::from_secs(60)));
        }
        assert!(!limiter.check("insights:org-1", 5, Duration::from_secs(60)));
    }

    #[test]
    fn window_expiry_admits_again_and_resets_the_counter() {
        let limiter = limiter();
        let window = Duration::from_millis(30);
        for _ in 0..3 {
            assert!(limiter.check("chat:u-1", 3, window));
        }
        assert!(!limiter.check("chat:u-1", 3, window));

        std::thread::sleep(window + Duration::from_millis(10));
        // fresh window: admitted, and the counter restarted at 1
        assert!(limiter.check("chat:u-1", 3, window));
        assert!(limiter.check("chat:u-1", 3, window));
    }

    #[test]
    fn distinct_keys_do_not_share_windows() {
        let limiter = limiter();
        assert!(limiter.check("chat:org-1:u-1", 1, Duration::from_secs(60)));
        assert!(!limiter.check("chat:org-1:u-1", 1, Duration::from_secs(60)));
        assert!(limiter.check("chat:org-1:u-2", 1, Duration::from_secs(60)));
    }

    #[test]
    fn policy_scope_builds_per_tenant_or_per_user_keys() {
        let limiter = limiter();
        let tenant = TenantId("org-1".to_string());
        let alice = UserId("alice".to_string());
        let bob = UserId("bob".to_string());

        // per-tenant policy: both users drain the same window
        for _ in 0..LimitPolicy::INSIGHTS.max_requests {
            limiter.check_policy(&LimitPolicy::INSIGHTS, &tenant, &alice).expect("admitted");
        }
        let rejected = limiter.check_policy(&LimitPolicy::INSIGHTS, &tenant, &bob);
        assert!(matches!(
            rejected,
            Err(GatewayError::RateLimitExceeded { operation: "insights", .. })
        ));

        // per-user policy: bob is unaffected by alice's usage
        for _ in 0..LimitPolicy::CHAT.max_requests {
            limiter.check_policy(&LimitPolicy::CHAT, &tenant, &alice).expect("admitted");
        }
        assert!(limiter.check_policy(&LimitPolicy::CHAT, &tenant, &bob).is_ok());
    }

    #[test]
    fn rejection_reports_a_positive_retry_after() {
        let limiter = limiter();
        let tenant = TenantId("org-1".to_string());
        let user = UserId("u-1".to_string());
        for _ in 0..LimitPolicy::EMAIL_DRAFT.max_requests {
            limiter.check_policy(&LimitPolicy::EMAIL_DRAFT, &tenant, &user).expect("admitted");
        }
        match limiter.check_policy(&LimitPolicy::EMAIL_DRAFT, &tenant, &user) {
            Err(GatewayError::RateLimitExceeded { retry_after_secs, .. }) => {
                assert!(retry_after_secs >= 1);
                assert!(retry_after_secs <= 60);
            }
            other => panic!("expected rate limit rejection, got {other:?}"),
        }
    }

    #[test]
    fn sweep_drops_expired_entries_for_all_keys() {
        let limiter = RateLimiter::new(Duration::from_millis(20));
        let window = Duration::from_millis(10);
        for key in ["a", "b", "c"] {
            assert!(limiter.check(key, 5, window));
        }
        assert_eq!(limiter.entry_count(), 3);

        std::thread::sleep(Duration::from_millis(40));
        // this check triggers the sweep; its own fresh entry survives
        assert!(limiter.check("d", 5, Duration::from_secs(60)));
        assert_eq!(limiter.entry_count(), 1);
    }

    #[test]
    fn concurrent_checks_never_admit_past_the_ceiling() {
        let limiter = Arc::new(limiter());
        let admitted = Arc::new(AtomicU32::new(0));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let limiter = Arc::clone(&limiter);
            let admitted = Arc::clone(&admitted);
            handles.push(std::thread::spawn(move || {
                for _ in 0..25 {
                    if limiter.check("shared", 50, Duration::from_secs(60)) {
                        admitted.fetch_add(1, Ordering::SeqCst);
                    }
                }
            }));
        }
        for handle in handles {
            handle.join().expect("worker thread");
        }
        assert_eq!(admitted.load(Ordering::SeqCst), 50);
    }

    #[test]
    fn documented_policies_match_the_published_ceilings() {
        assert_eq!(LimitPolicy::CHAT.max_requests, 30);
        assert_eq!(LimitPolicy::CHAT.scope, LimitScope::PerUser);
        assert_eq!(LimitPolicy::EMAIL_DRAFT.max_requests, 10);
        assert_eq!(LimitPolicy::INSIGHTS.max_requests, 5);
        assert_eq!(LimitPolicy::INSIGHTS.scope, LimitScope::PerTenant);
        assert_eq!(LimitPolicy::CONNECTION_TEST.max_requests, 5);
        assert_eq!(LimitPolicy::DOCUMENT_SEARCH.max_requests, 20);
        for policy in [
            LimitPolicy::CHAT,
            LimitPolicy::EMAIL_DRAFT,
            LimitPolicy::INSIGHTS,
            LimitPolicy::CONNECTION_TEST,
            LimitPolicy::DOCUMENT_SEARCH,
        ] {
            assert_eq!(policy.window, Duration::from_secs(60));
        }
    }
}
