// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

#![no_main]

use gallerist::reference::SubmissionReference;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(link) = std::str::from_utf8(data) else {
        return;
    };
    if let Ok(reference) = SubmissionReference::parse(link) {
        // a parsed reference prints back to a link that parses to itself
        let again = SubmissionReference::parse(&reference.to_string());
        assert_eq!(again, Ok(reference));
    }
});
