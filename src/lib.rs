//! Core pipeline behind the solar potential dashboard: load per-country
//! irradiance CSVs, combine them into one labelled table, derive filtered
//! views, and compute grouped statistics plus a Kruskal–Wallis comparison.
//! Rendering is someone else's job; every operation here returns plain
//! values (or structured failure descriptors) for a presentation layer to
//! consume.

pub mod aggregate;
pub mod config;
pub mod filter;
pub mod load;
pub mod stats;
pub mod table;
