//! # Adapty SDK
//!
//! Client-side subscriber identity and purchase synchronization for the
//! Adapty subscription backend.
//!
//! The SDK keeps a local profile and installation in step with the backend,
//! validates platform store transactions before acknowledging them, and
//! reports foreground usage through periodic live-event heartbeats.
//!
//! ## Components
//!
//! - [`IdentityStore`]: owns profile, installation and purchaser info in
//!   memory, mirrored to a [`LocalCache`] on every change
//! - [`SyncEngine`]: create-once profile registration and sparse updates
//! - [`PurchasePipeline`]: observe → validate → finalize for store transactions
//! - [`HeartbeatScheduler`]: live-session heartbeats across foreground/background
//! - [`RemoteApi`]: the backend boundary, implemented over HTTP by [`HttpApi`]
//!
//! [`Adapty`] wires them together behind the public surface.
//!
//! ## Features
//!
//! - `native-storage` (default): JSON file-backed [`FileStorage`]
//! - `native-tls` (default): Use native TLS for HTTPS
//! - `rustls-tls`: Use rustls for HTTPS (alternative to native-tls)

pub mod api;
pub mod client;
pub mod config;
pub mod device;
pub mod error;
pub mod identity;
pub mod models;
pub mod purchases;
pub mod sessions;
pub mod storage;
pub mod sync;

pub use api::{HttpApi, RemoteApi};
pub use client::Adapty;
pub use config::{AdaptyOptions, DEFAULT_BASE_URL};
pub use error::{AdaptyError, AdaptyErrorCode, Result};
pub use identity::IdentityStore;
pub use models::{
    AccessLevel, Attribution, ContainerProduct, EntitlementSnapshot, Installation, Parameters,
    PlatformProduct, Profile, ProfileAttributes, PurchaseContainer, PurchaseResult,
    StoreTransaction, TransactionState, ValidationContext,
};
pub use purchases::{PurchasePipeline, PurchaseQueue};
pub use sessions::{HeartbeatScheduler, LiveSession};
pub use storage::{LocalCache, MemoryStorage};
pub use sync::SyncEngine;

#[cfg(feature = "native-storage")]
pub use storage::FileStorage;

pub use device::generate_uuid;
