pub mod poller;
pub mod status_api;

pub use poller::{ClientStatusPoller, PollMachine, PollState, PollerSnapshot, Visibility};
pub use status_api::{HttpStatusApi, PollerError, StatusApi};
