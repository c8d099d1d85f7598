pub mod connection;
pub mod container;
pub mod diff;
pub mod session;
pub mod state;
pub mod task;

pub use connection::{Credentials, ProxmoxConnection};
pub use container::ContainerSpec;
pub use diff::{ChangeKind, ChangePlan, FieldChange};
pub use session::AuthSession;
pub use state::ContainerState;
pub use task::{TaskRef, TaskStatus};
