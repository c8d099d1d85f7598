use crate::core::domain::error::ValidationError;

/// Lowest guest identifier Proxmox accepts; ids below are reserved.
pub(crate) const VM_ID_MIN: u32 = 100;
/// Highest guest identifier Proxmox accepts.
pub(crate) const VM_ID_MAX: u32 = 999_999_999;

/// Validates a container identifier against the range the cluster accepts.
pub(crate) fn validate_vm_id(vm_id: u32) -> Result<(), ValidationError> {
    if !(VM_ID_MIN..=VM_ID_MAX).contains(&vm_id) {
        return Err(ValidationError::Field {
            field: "vm_id".to_string(),
            message: format!("Id must be between {VM_ID_MIN} and {VM_ID_MAX}, got {vm_id}"),
        });
    }
    Ok(())
}
