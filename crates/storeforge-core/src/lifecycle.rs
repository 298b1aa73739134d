use crate::CoreError;
use storeforge_store::StoreStatus;

/// Check a status write against the store lifecycle.
///
/// `Provisioning` resolves to `Ready` or `Failed`; settled stores may start
/// deleting; a deletion that fails leaves the store `Failed`.
pub fn validate_transition(from: StoreStatus, to: StoreStatus) -> Result<(), CoreError> {
    let valid = matches!(
        (from, to),
        (
            StoreStatus::Provisioning,
            StoreStatus::Ready | StoreStatus::Failed
        ) | (
            StoreStatus::Ready | StoreStatus::Failed,
            StoreStatus::Deleting
        ) | (StoreStatus::Deleting, StoreStatus::Failed)
    );

    if valid {
        Ok(())
    } else {
        Err(CoreError::InvalidTransition { from, to })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_transitions() {
        assert!(validate_transition(StoreStatus::Provisioning, StoreStatus::Ready).is_ok());
        assert!(validate_transition(StoreStatus::Provisioning, StoreStatus::Failed).is_ok());
        assert!(validate_transition(StoreStatus::Ready, StoreStatus::Deleting).is_ok());
        assert!(validate_transition(StoreStatus::Failed, StoreStatus::Deleting).is_ok());
        assert!(validate_transition(StoreStatus::Deleting, StoreStatus::Failed).is_ok());
    }

    #[test]
    fn invalid_transitions() {
        assert!(validate_transition(StoreStatus::Provisioning, StoreStatus::Deleting).is_err());
        assert!(validate_transition(StoreStatus::Ready, StoreStatus::Provisioning).is_err());
        assert!(validate_transition(StoreStatus::Ready, StoreStatus::Failed).is_err());
        assert!(validate_transition(StoreStatus::Failed, StoreStatus::Ready).is_err());
        assert!(validate_transition(StoreStatus::Deleting, StoreStatus::Deleting).is_err());
        assert!(validate_transition(StoreStatus::Deleting, StoreStatus::Ready).is_err());
        assert!(validate_transition(StoreStatus::Ready, StoreStatus::Ready).is_err());
    }
}
