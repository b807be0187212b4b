// SPDX-FileCopyrightText: 2026 Mqhook Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test utilities for mqhook integration tests.
//!
//! # Components
//!
//! - [`RecordingPublisher`] - captures script publishes, optionally failing them
//! - [`RecordingObserver`] - records launch order, skips and completions
//! - [`TestHarness`] - a full engine over a temp database
//! - [`fixtures`] - script and event shorthands

pub mod fixtures;
pub mod harness;
pub mod mock_observer;
pub mod mock_publisher;

pub use harness::{TestHarness, TestHarnessBuilder};
pub use mock_observer::RecordingObserver;
pub use mock_publisher::RecordingPublisher;
