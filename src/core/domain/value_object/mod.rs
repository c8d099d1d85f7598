mod auth_tokens;
mod credentials;
mod disk_spec;
mod endpoint;
mod hostname;
mod net_spec;
mod vm_id;

pub use auth_tokens::{AuthTicket, CsrfToken};
pub use disk_spec::DiskSpec;
pub use endpoint::ApiEndpoint;
pub use net_spec::NetSpec;

// Re-export validation functions for internal use
pub(crate) use auth_tokens::{validate_csrf_token, validate_ticket};
pub(crate) use credentials::{
    validate_password, validate_realm, validate_token_id, validate_username,
};
pub(crate) use disk_spec::validate_mount_name;
pub(crate) use hostname::validate_hostname;
pub(crate) use net_spec::validate_net_name;
pub(crate) use vm_id::validate_vm_id;
