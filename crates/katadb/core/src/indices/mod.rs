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

// Secondary indexes: ordered value index, inverted text index and the
// manager that keeps both consistent with committed versions.

pub mod inverted_index;
pub mod lib;
pub mod manager;
pub mod ordered_index;
pub mod tokenizer;

pub use inverted_index::InvertedIndex;
pub use lib::{IndexKey, IndexStats, IndexType, KeyRange, ScoredKey, SecondaryIndex};
pub use manager::IndexManager;
pub use ordered_index::OrderedIndex;
pub use tokenizer::{normalize_query, term_frequencies, tokenize};
