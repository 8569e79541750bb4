//! Why a player is paused.
//!
//! Each trigger owns its own reason. The engine is paused when the first
//! reason appears and resumed only when the last one goes away, so automatic
//! triggers can never undo an explicit user pause.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SuspendReason {
    User,
    Maximized,
    Idle,
    Disappeared,
}

/// Transition caused by adding or removing a reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Suspend,
    Resume,
    Unchanged,
}

#[derive(Debug, Default, Clone)]
pub struct SuspendReasons {
    reasons: Vec<SuspendReason>,
}

impl SuspendReasons {
    pub fn insert(&mut self, reason: SuspendReason) -> Transition {
        if self.reasons.contains(&reason) {
            return Transition::Unchanged;
        }
        self.reasons.push(reason);
        if self.reasons.len() == 1 {
            Transition::Suspend
        } else {
            Transition::Unchanged
        }
    }

    pub fn remove(&mut self, reason: SuspendReason) -> Transition {
        let before = self.reasons.len();
        self.reasons.retain(|r| *r != reason);
        if before > 0 && self.reasons.is_empty() {
            Transition::Resume
        } else {
            Transition::Unchanged
        }
    }

    pub fn contains(&self, reason: SuspendReason) -> bool {
        self.reasons.contains(&reason)
    }

    pub fn is_suspended(&self) -> bool {
        !self.reasons.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_reason_suspends_last_resumes() {
        let mut reasons = SuspendReasons::default();
        assert_eq!(reasons.insert(SuspendReason::Maximized), Transition::Suspend);
        assert_eq!(reasons.insert(SuspendReason::User), Transition::Unchanged);
        assert_eq!(reasons.remove(SuspendReason::Maximized), Transition::Unchanged);
        assert!(reasons.is_suspended());
        assert_eq!(reasons.remove(SuspendReason::User), Transition::Resume);
        assert!(!reasons.is_suspended());
    }

    #[test]
    fn test_duplicates_and_absent_removals() {
        let mut reasons = SuspendReasons::default();
        assert_eq!(reasons.remove(SuspendReason::Idle), Transition::Unchanged);
        reasons.insert(SuspendReason::Idle);
        assert_eq!(reasons.insert(SuspendReason::Idle), Transition::Unchanged);
        reasons.insert(SuspendReason::Disappeared);
        assert!(reasons.contains(SuspendReason::Disappeared));
        assert_eq!(reasons.remove(SuspendReason::Idle), Transition::Unchanged);
        assert_eq!(reasons.remove(SuspendReason::Disappeared), Transition::Resume);
    }
}
