// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use chrono::Local;
use rand::Rng;

fn random_lowercase(len: usize) -> String {
    let mut rng = rand::rng();
    (0..len)
        .map(|_| {
            let idx = rng.random_range(0..26);
            (b'a' + idx) as char
        })
        .collect()
}

/// Run identifier of the form "YYYY-MM-DD-xxxxxxxxxx".
pub fn generate_run_id() -> String {
    let date = Local::now().format("%Y-%m-%d").to_string();
    format!("{}-{}", date, random_lowercase(10))
}

/// Random token for delimiting command output on a shared shell.
pub fn generate_marker_token() -> String {
    random_lowercase(16)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_id_has_date_prefix_and_random_suffix() {
        let id = generate_run_id();
        let (date, suffix) = id.rsplit_once('-').unwrap();
        assert_eq!(date.len(), 10);
        assert_eq!(suffix.len(), 10);
        assert!(suffix.bytes().all(|b| b.is_ascii_lowercase()));
    }

    #[test]
    fn marker_tokens_differ() {
        assert_ne!(generate_marker_token(), generate_marker_token());
    }
}
