pub mod handler;
pub mod lxc;
