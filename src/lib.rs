// Copyright (c) Rideshare Platform Team
// SPDX-License-Identifier: Apache-2.0

//! Driver earnings, payouts and rider balance ledgers for the rideshare
//! mobile backend.

pub mod api;
pub mod auth;
pub mod clock;
pub mod config;
pub mod crypto;
pub mod db;
pub mod error;
pub mod metrics;
pub mod models;
pub mod notify;
pub mod period;
pub mod projections;
pub mod reference;
pub mod schema;
pub mod services;
pub mod store;
