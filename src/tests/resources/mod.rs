mod lxc_tests;
mod provider_tests;
