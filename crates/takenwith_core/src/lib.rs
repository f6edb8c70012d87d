pub mod api;
pub mod camera;
pub mod catcounts;
pub mod config;
pub mod disambiguate;
pub mod editor;
pub mod filters;
pub mod gallery;
pub mod mapping;
pub mod pipeline;
pub mod record;
pub mod reclassify;
pub mod runtime;
pub mod stats;
