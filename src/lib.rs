pub mod actor_tree;
pub mod cache;
pub mod checkpoint;
pub mod config;
pub mod enrich;
pub mod error;
pub mod filmography;
pub mod index;
pub mod journal;
pub mod logging;
pub mod provider;
pub mod report;
pub mod roster;
pub mod scan;
pub mod tmdb;
pub mod tree;
pub mod video;
pub mod wikidata;

pub use error::{Error, Result};
