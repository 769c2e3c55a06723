use std::sync::{
    atomic::{AtomicI64, Ordering},
    Arc,
};

use crate::Grant;

/// The provider's not-before policy.
///
/// Keycloak can push a timestamp to the application (see
/// [`routes::router`](crate::routes::router)); any grant issued before it is
/// no longer honoured. Clones share the same value.
#[derive(Debug, Clone, Default)]
pub struct NotBefore(Arc<AtomicI64>);

impl NotBefore {
    /// Creates a policy admitting every grant.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current policy timestamp, in unix seconds.
    pub fn get(&self) -> i64 {
        self.0.load(Ordering::Acquire)
    }

    /// Replaces the policy timestamp.
    pub fn set(&self, not_before: i64) {
        self.0.store(not_before, Ordering::Release);
    }

    /// Whether `grant` was issued at or after the policy timestamp.
    pub fn admits(&self, grant: &Grant) -> bool {
        grant.issued_at >= self.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_policy() {
        let policy = NotBefore::new();
        let grant = Grant {
            issued_at: 10,
            ..Grant::bearer("token")
        };
        assert!(policy.admits(&grant));

        policy.clone().set(11);
        assert_eq!(policy.get(), 11);
        assert!(!policy.admits(&grant));
    }
}
