// Dotlanth
// Copyright (C) 2025 Synerthink

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

//! Text tokenizer shared by indexing and querying.
//!
//! Lowercases, splits on every non-alphanumeric character and drops empty
//! tokens. The same function runs on both sides so query tokens always line
//! up with indexed ones.

use std::collections::BTreeMap;

/// Split `text` into normalized tokens, in order of appearance
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Token counts of `text`
pub fn term_frequencies(text: &str) -> BTreeMap<String, u32> {
    let mut frequencies = BTreeMap::new();
    for token in tokenize(text) {
        *frequencies.entry(token).or_insert(0) += 1;
    }
    frequencies
}

/// Normalize caller-supplied query tokens, keeping first occurrences only
pub fn normalize_query<S: AsRef<str>>(tokens: &[S]) -> Vec<String> {
    let mut seen = Vec::new();
    for token in tokens.iter().flat_map(|t| tokenize(t.as_ref())) {
        if !seen.contains(&token) {
            seen.push(token);
        }
    }
    seen
}
