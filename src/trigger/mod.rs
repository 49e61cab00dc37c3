pub mod poller;
pub mod policy;
pub mod state;
