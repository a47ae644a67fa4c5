//! Redliner - conversational document-editing assistant
//!
//! A client posts a document snapshot and an instruction; the server streams
//! back narration interleaved with structured edit commands. Each session owns
//! one long-lived agent whose model can be swapped between turns.

pub mod agent;
pub mod api;
pub mod app_state;
pub mod config;
pub mod fingerprint;
pub mod models;
pub mod persistence;
pub mod placeholders;
pub mod stream;
pub mod tools;
