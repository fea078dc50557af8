//! Brain to Reverse Inference Ontology.
//!
//! Maps the regions of a NIfTI map to cognitive ontology terms. For every region
//! and term it estimates, over random folds of a meta-analysis corpus, how much
//! more likely the term is reported by studies with peaks inside the region than
//! by studies with peaks elsewhere.

pub mod aggregate;
pub mod choice;
pub mod config;
pub mod coords;
pub mod corpus;
pub mod error;
pub mod folds;
pub mod grid;
pub mod nifti;
pub mod odds;
pub mod ontology;
pub mod pipeline;
pub mod proximity;
pub mod regions;

pub use config::Params;
pub use error::{Error, Result};
pub use pipeline::run;
