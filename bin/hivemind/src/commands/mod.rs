pub mod metrics;
pub mod onboard;
pub mod route;
pub mod run_cmd;
pub mod status;
