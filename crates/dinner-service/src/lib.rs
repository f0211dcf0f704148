//! Dinner Surprise HTTP API service.
//!
//! This crate keeps three records about each user in agreement:
//!
//! - the Stripe subscription (authoritative for paid plans)
//! - the local subscription record
//! - the profile tier mirror and quota counters
//!
//! Stripe webhooks, client-initiated syncs and the maintenance sweep all go
//! through the same [`ReconciliationEngine`], so any of them converges on the
//! same state. Recipe generation and saving are metered by the
//! [`UsageLedger`].
//!
//! # Authentication
//!
//! 1. **Session JWTs** (HS256, Supabase-issued) - for end-user requests
//! 2. **Admin API key** - for the maintenance endpoints
//! 3. **Stripe signatures** - for webhooks

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
// Allow some pedantic lints that are noisy for Axum handler functions
#![allow(clippy::missing_errors_doc)] // Axum handlers all return Result
#![allow(clippy::unused_async)]

pub mod ai;
pub mod auth;
pub mod config;
pub mod crypto;
pub mod error;
pub mod events;
pub mod handlers;
pub mod ledger;
pub mod reconcile;
pub mod routes;
pub mod state;
pub mod stripe;

pub use ai::{AiError, DeepSeekClient, RecipeGenerator, RecipeRequest};
pub use config::ServiceConfig;
pub use error::ApiError;
pub use events::{BillingEvent, EventOutcome};
pub use ledger::{LedgerError, UsageLedger};
pub use reconcile::{ReconcileError, ReconciliationEngine, SweepReport};
pub use routes::create_router;
pub use state::{AppState, StoreHandle};
pub use stripe::{BillingProvider, StripeClient, StripeError};
