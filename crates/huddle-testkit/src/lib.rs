//! # Huddle Testkit
//!
//! Testing utilities for huddle.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Fixtures**: deterministic messages and a [`TestMesh`] that runs real
//!   nodes over an in-memory network
//! - **Generators**: Proptest strategies for user ids, messages and logs
//!
//! ## Test Fixtures
//!
//! ```rust,no_run
//! use huddle_testkit::fixtures::TestMesh;
//!
//! async fn scenario() {
//!     let mesh = TestMesh::new();
//!     let (phone, laptop) = mesh.spawn_known_pair("Phone", "Laptop").await;
//!     phone.handle.start().await.unwrap();
//!     laptop.handle.start().await.unwrap();
//!     phone.wait_connected_to(&laptop).await;
//! }
//! ```
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use huddle_testkit::generators::{message_log, user_id};
//!
//! proptest! {
//!     #[test]
//!     fn digest_ignores_order(log in message_log(user_id(), 20)) {
//!         // ...
//!     }
//! }
//! ```

pub mod fixtures;
pub mod generators;

pub use fixtures::{eventually, init_tracing, message, remember, DeviceSetup, TestDevice, TestMesh};
pub use generators::{chat_message, diverging_logs, message_log, user_id};
