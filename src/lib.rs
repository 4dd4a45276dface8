pub mod classifier;
pub mod config;
pub mod crm;
pub mod dedupe;
pub mod event;
pub mod handlers;
pub mod lifecycle;
pub mod outbound;
pub mod phone;
pub mod queue;
pub mod tracker;
