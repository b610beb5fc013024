//! Upstream collectors.
//!
//! # Supported Sources
//!
//! | Source | Module | Method | Notes |
//! |--------|--------|--------|-------|
//! | OpenStreetMap | [`overpass`] | Overpass QL POST | One combined query per run |
//! | Event pages | [`events`] | HTML scraping | Ordered selector strategies, link fallback |
//!
//! Both collectors wrap their single-request client in
//! [`RetryFetch`](crate::api::RetryFetch) and degrade to "no data" when the
//! upstream stays unavailable.

pub mod events;
pub mod overpass;
