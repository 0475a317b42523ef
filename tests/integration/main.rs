//! Integration tests for the ingest engine
//!
//! Mock collaborators stand in for the network and the analyzer, except in
//! `fetcher_tests`, which runs the real HTTP fetcher against wiremock.

mod batch_tests;
mod common;
mod coordinator_tests;
mod fetcher_tests;
mod pool_tests;
mod recovery_tests;
