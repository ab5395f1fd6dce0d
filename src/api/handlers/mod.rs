// Copyright (c) Rideshare Platform Team
// SPDX-License-Identifier: Apache-2.0

pub mod admin;
pub mod earnings;
pub mod gift_cards;
pub mod health;
pub mod loyalty;
pub mod ride_history;
