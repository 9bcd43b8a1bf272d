#![doc = "wiki-versioner-core: export, ledger and replay logic for wiki-versioner."]

//! Replays versioned document sets as git history and exports wiki page
//! trees into the layout the replay reads.
//!
//! # Usage
//! The CLI crate wires [`replay::Replayer`] and [`export::Exporter`] to their
//! real adapters ([`vcs::GitCli`], [`convert::DefaultConverter`],
//! [`export::confluence::ConfluenceClient`], [`ledger::SqliteLedger`]). Tests
//! swap in the mocks exported under the `test-export-mocks` feature.

pub mod config;
pub mod contract;
pub mod convert;
pub mod discovery;
pub mod export;
pub mod ledger;
pub mod replay;
pub mod vcs;
pub mod version;
