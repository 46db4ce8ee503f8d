pub mod analyzer;
pub mod config;
pub mod domain;
pub mod error;
pub mod fetcher;
pub mod harvest;
pub mod merge;
pub mod output;
pub mod pdf;
pub mod registry;
pub mod resolver;
pub mod retry;
pub mod search;
pub mod storage;
pub mod workspace;
