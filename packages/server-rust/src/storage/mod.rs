//! Persistence adapters. The relational store is an external collaborator;
//! this crate ships the in-memory implementation used in development and tests.

pub mod memory;

pub use memory::MemoryRepository;
