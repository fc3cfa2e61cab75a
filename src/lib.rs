//! Full-page HTTP response cache with a CSS/JS minification pipeline.
//!
//! The [`cache`] module is host-agnostic: any axum application can put
//! [`cache::page_cache_layer`] in front of its routes. The `pagestash` binary
//! deploys it as a caching reverse proxy in front of an HTML origin.

pub mod application;
pub mod cache;
pub mod config;
pub mod infra;
