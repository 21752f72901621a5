#![doc = "filemover-core: core logic library for filemover."]

//! This crate holds the transfer engine that moves media files from a source
//! wiki to a shared destination repository: eligibility, destination naming,
//! description page parsing and rewriting, and the per-file transaction.
//! Network access goes through the [`contract::Wiki`] trait only.
//!
//! # Usage
//! Build a [`transfer::Transferer`] over two `Wiki` implementations and a
//! [`config::TransferConfig`], then call `transfer` with a list of file titles.

pub mod aliases;
pub mod config;
pub mod contract;
pub mod describe;
pub mod eligibility;
pub mod error;
pub mod naming;
pub mod parse;
pub mod rewrite;
pub mod transfer;
pub mod tree;
