// Copyright (c) Rideshare Platform Team
// SPDX-License-Identifier: Apache-2.0

//! Human-readable identifiers handed to drivers and riders.

use rand::rngs::OsRng;
use rand::Rng;

/// No 0/O or 1/I, so references survive being read aloud.
pub const UNAMBIGUOUS_ALPHABET: &[u8; 32] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Draws characters uniformly from [`UNAMBIGUOUS_ALPHABET`] using the OS CSPRNG.
pub fn random_chars(len: usize) -> String {
    let mut rng = OsRng;
    (0..len)
        .map(|_| UNAMBIGUOUS_ALPHABET[rng.gen_range(0..UNAMBIGUOUS_ALPHABET.len())] as char)
        .collect()
}

/// `PAY-XXXXXXXXXX`
pub fn payout_reference() -> String {
    format!("PAY-{}", random_chars(10))
}

/// `RCP-XXXXXX-XXXXXX`
pub fn receipt_id() -> String {
    format!("RCP-{}-{}", random_chars(6), random_chars(6))
}

/// `XXXX-XXXX-XXXX-XXXX`
pub fn gift_card_code() -> String {
    (0..4).map(|_| random_chars(4)).collect::<Vec<_>>().join("-")
}

/// Canonical `XXXX-XXXX-XXXX-XXXX` form of a code typed in by a user. Case,
/// whitespace and separators are ignored.
pub fn normalize_code(input: &str) -> String {
    let chars: Vec<char> = input
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_uppercase())
        .collect();
    chars
        .chunks(4)
        .map(|group| group.iter().collect::<String>())
        .collect::<Vec<_>>()
        .join("-")
}
