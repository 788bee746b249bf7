//! Egress bridge library.
//!
//! The bridge is deployed inside a tenant's network and forwards
//! authenticated proxy requests from the control-plane API to
//! tenant-internal data sources, over HTTP or over raw TCP tunnelled
//! through an HTTP upgrade. Data sources are never exposed publicly; all
//! traffic is initiated outbound and a single bearer-authenticated
//! endpoint covers both payload kinds.
//!
//! # Modules
//!
//! - `config` - Service configuration from environment
//! - `errors` - Error types with HTTP status code mapping
//! - `ctxtime` - Request-scoped frozen clock
//! - `auth` - Token claims and verification against the key set
//! - `middleware` - Middleware composer, clock and auth middlewares
//! - `tasks` - Public-key refresh background worker
//! - `proxy` - Dual-mode reverse proxy (HTTP and TCP tunnel)
//! - `routes` - Root router and auxiliary check-connection server

pub mod auth;
pub mod config;
pub mod ctxtime;
pub mod errors;
pub mod middleware;
pub mod proxy;
pub mod routes;
pub mod tasks;
