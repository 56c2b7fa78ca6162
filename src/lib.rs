//! # Tributary
//!
//! A feed aggregation backend speaking the Microsub protocol.
//!
//! ## Architecture
//!
//! Tributary follows a pipeline architecture:
//!
//! ```text
//! Scheduler / WebSub push → Fetcher → Normalizer → Router → Timelines → Broker
//! ```
//!
//! - [`fetcher`]: HTTP client behind a one hour response cache
//! - [`normalizer`]: Converts HTML (microformats2), JSON Feed and RSS/Atom to [`Item`](domain::Item)s
//! - [`router`]: Per-channel include/exclude rules
//! - [`timeline`]: Pluggable per-channel timeline storage
//! - [`broker`]: Fans channel and item events out to live clients
//!
//! ## Quick Start
//!
//! ```bash
//! # Run the server and the refresh scheduler
//! tributary serve
//!
//! # Poll every feed once
//! tributary refresh
//!
//! # See what a URL would produce
//! tributary preview https://example.com/
//! ```

/// Application context and error handling.
///
/// The [`AppContext`](app::AppContext) struct wires together all components.
pub mod app;

/// Bearer-token request authorization.
pub mod auth;

/// Event broker feeding the server-sent event stream.
pub mod broker;

/// Command-line interface using clap.
///
/// - `serve` - Run the HTTP server and refresh scheduler
/// - `refresh` - Poll all feeds once
/// - `preview <url>` - Fetch and normalize without storing
pub mod cli;

/// Configuration loaded from `~/.config/tributary/config.toml`.
pub mod config;

/// Periodic refresh of every feed, plus WebSub lease renewal.
pub mod daemon;

/// Core domain models.
///
/// - [`Item`](domain::Item): Canonical post with SHA-256 ids
/// - [`Channel`](domain::Channel): Named timeline with its unread indicator
/// - [`Feed`](domain::Feed): Followed source and its WebSub state
pub mod domain;

/// HTTP fetching with a response cache.
///
/// - [`Fetcher`](fetcher::Fetcher): Async trait for fetching
/// - [`HttpFetcher`](fetcher::HttpFetcher): reqwest-based implementation
/// - [`CachingFetcher`](fetcher::CachingFetcher): Cache wrapper over any fetcher
pub mod fetcher;

/// Shared path from fetched or pushed content to stored posts.
pub mod ingest;

/// Sorted sets, capped logs and expiring strings stored in SQLite.
pub mod keyspace;

/// Content-type dispatch to the microformats2, JSON Feed and RSS/Atom parsers.
pub mod normalizer;

pub mod router;

pub mod search;

/// axum HTTP server.
pub mod server;

/// SQLite persistence layer.
///
/// - [`Store`](store::Store): Trait defining storage operations
/// - [`SqliteStore`](store::SqliteStore): SQLite implementation
pub mod store;

/// Per-channel timelines with interchangeable backends.
pub mod timeline;

/// WebSub subscriber.
pub mod websub;
