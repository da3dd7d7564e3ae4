//! IELTS mock-exam simulator: generates a practice test from a video transcript, runs the
//! test-taking flow, has the writing and speaking answers scored, and renders the report.

pub mod chart;
pub mod config;
pub mod document;
pub mod domain;
pub mod error;
pub mod flow;
pub mod gateway;
pub mod logic;
pub mod openai;
pub mod protocol;
pub mod report;
pub mod routes;
pub mod speech;
pub mod state;
pub mod telemetry;
pub mod testing;
pub mod util;
pub mod validation;
pub mod workflow;
