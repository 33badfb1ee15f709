//! Per-call access context handed to every collaborator operation.

use std::time::{Duration, Instant};

use super::error::StoreError;
use crate::declarative::resource::ResourceKind;
use crate::model::{MutabilityMode, Traits};

/// Which write path a call belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Authority {
    Imperative,
    Declarative,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    ReadOnly,
    ReadWrite,
}

/// Authority, access mode, force flag and deadline for one call.
#[derive(Debug, Clone)]
pub struct AccessContext {
    authority: Authority,
    mode: AccessMode,
    force: bool,
    deadline: Option<Instant>,
}

impl AccessContext {
    /// Read-write context of the declarative engine.
    pub fn declarative() -> Self {
        Self {
            authority: Authority::Declarative,
            mode: AccessMode::ReadWrite,
            force: false,
            deadline: None,
        }
    }

    /// Read-write context of the interactive API.
    pub fn imperative() -> Self {
        Self {
            authority: Authority::Imperative,
            mode: AccessMode::ReadWrite,
            force: false,
            deadline: None,
        }
    }

    /// Context for reads and diagnostics.
    pub fn read_only() -> Self {
        Self {
            authority: Authority::Imperative,
            mode: AccessMode::ReadOnly,
            force: false,
            deadline: None,
        }
    }

    /// Allows mutation of objects protected by `ALLOW_MUTATE_FORCED`.
    pub fn with_force(mut self) -> Self {
        self.force = true;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn authority(&self) -> Authority {
        self.authority
    }

    pub fn is_forced(&self) -> bool {
        self.force
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn can_write(&self) -> bool {
        self.mode == AccessMode::ReadWrite
    }

    /// Fails with `DeadlineExceeded` once the deadline has passed.
    pub fn check_deadline(&self) -> Result<(), StoreError> {
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(StoreError::DeadlineExceeded),
            _ => Ok(()),
        }
    }

    /// Fails with `NotAuthorized` on a read-only context.
    pub fn require_write(&self) -> Result<(), StoreError> {
        if !self.can_write() {
            return Err(StoreError::NotAuthorized(
                "write attempted with a read-only context".to_string(),
            ));
        }
        Ok(())
    }

    /// Checks that this context may mutate an object carrying `traits`.
    pub fn check_mutable(
        &self,
        kind: ResourceKind,
        id: &str,
        traits: &Traits,
    ) -> Result<(), StoreError> {
        self.check_origin(kind, id, traits)?;
        if traits.mutability_mode == MutabilityMode::AllowMutateForced && !self.force {
            return Err(StoreError::NotAuthorized(format!(
                "{kind} '{id}' can only be modified with force"
            )));
        }
        Ok(())
    }

    /// Checks that this context's write path owns objects carrying `traits`.
    pub fn check_origin(
        &self,
        kind: ResourceKind,
        id: &str,
        traits: &Traits,
    ) -> Result<(), StoreError> {
        self.require_write()?;
        let owned = match self.authority {
            Authority::Declarative => traits.origin.is_declarative(),
            Authority::Imperative => traits.origin.is_imperative(),
        };
        if !owned {
            return Err(StoreError::NotAuthorized(format!(
                "{kind} '{id}' has origin {} and cannot be modified by the {} path",
                traits.origin,
                self.authority_label()
            )));
        }
        Ok(())
    }

    fn authority_label(&self) -> &'static str {
        match self.authority {
            Authority::Declarative => "declarative",
            Authority::Imperative => "imperative",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Origin;

    #[test]
    fn test_declarative_context_owns_declarative_objects() {
        let ctx = AccessContext::declarative();
        assert!(ctx
            .check_mutable(ResourceKind::Role, "r", &Traits::declarative())
            .is_ok());
        let orphaned = Traits {
            origin: Origin::DeclarativeOrphaned,
            ..Traits::declarative()
        };
        assert!(ctx.check_mutable(ResourceKind::Role, "r", &orphaned).is_ok());
        let err = ctx
            .check_mutable(ResourceKind::Role, "r", &Traits::imperative())
            .unwrap_err();
        assert!(matches!(err, StoreError::NotAuthorized(_)));
    }

    #[test]
    fn test_imperative_context_cannot_touch_declarative_objects() {
        let ctx = AccessContext::imperative();
        assert!(ctx
            .check_mutable(ResourceKind::Notifier, "n", &Traits::declarative())
            .is_err());
        let default = Traits {
            origin: Origin::Default,
            ..Traits::imperative()
        };
        assert!(ctx.check_mutable(ResourceKind::Notifier, "n", &default).is_ok());
    }

    #[test]
    fn test_forced_mutability_requires_force() {
        let traits = Traits::declarative().with_mutability(MutabilityMode::AllowMutateForced);
        let ctx = AccessContext::declarative();
        assert!(ctx.check_mutable(ResourceKind::Group, "g", &traits).is_err());
        assert!(ctx
            .with_force()
            .check_mutable(ResourceKind::Group, "g", &traits)
            .is_ok());
    }

    #[test]
    fn test_read_only_context_rejects_writes() {
        let ctx = AccessContext::read_only();
        assert!(!ctx.can_write());
        assert!(ctx.require_write().is_err());
    }

    #[test]
    fn test_deadline() {
        let expired = AccessContext::declarative().with_deadline(Instant::now());
        assert!(matches!(
            expired.check_deadline(),
            Err(StoreError::DeadlineExceeded)
        ));
        let later = AccessContext::declarative().with_timeout(Duration::from_secs(60));
        assert!(later.check_deadline().is_ok());
    }
}
