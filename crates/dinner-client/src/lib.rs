//! Dinner Surprise Client SDK.
//!
//! A typed client for the Dinner Surprise service, for front-end backends
//! and operational scripts.
//!
//! # Example
//!
//! ```no_run
//! use dinner_client::{DinnerClient, GenerateRecipeRequest};
//! use dinner_core::UserId;
//!
//! # async fn example(user_id: UserId, session_jwt: &str) -> Result<(), dinner_client::ClientError> {
//! let client = DinnerClient::new("http://dinner-service:8080")?.with_session(session_jwt);
//!
//! let synced = client.sync_subscription(user_id).await?;
//! println!("Plan: {}", synced.subscription.plan_type);
//!
//! let generated = client
//!     .generate_recipe(&GenerateRecipeRequest::new(user_id, ["rice", "eggs"]))
//!     .await?;
//! println!("{}", generated.recipe["title"]);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

mod client;
mod error;
mod types;

pub use client::{ClientOptions, DinnerClient};
pub use error::ClientError;
pub use types::*;
