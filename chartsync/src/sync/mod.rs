pub mod cache;
pub mod document;
pub mod events;
pub mod group;
pub mod library;
pub mod manifest;
pub mod orchestrator;
pub mod paths;
pub mod pipeline;
pub mod reconcile;
pub mod remote;
pub mod retry;
pub mod transfer;

#[cfg(test)]
pub(crate) mod test_support;
