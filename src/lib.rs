//! promogate: a human-gated content pipeline.
//!
//! A job is submitted with a [`job::TaskPlan`], waits in `pending_approval`
//! until its owner approves it, and is then dispatched through a
//! [`channel::MessageChannel`] to a worker that generates captions, an image
//! and a video in parallel. Results are committed back to the
//! [`store::JobStore`] with a conditional update, so duplicate deliveries and
//! concurrent approvals settle to a single outcome.

pub mod anthropic;
pub mod approval;
pub mod channel;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod generator;
pub mod identity;
pub mod job;
mod lock;
pub mod objects;
pub mod orchestrator;
pub mod pipeline;
pub mod store;
