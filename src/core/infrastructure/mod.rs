pub mod api_client;
pub mod retry;
pub mod task_poller;
