// Trawler is an open source web crawling engine.
// Copyright (C) 2024 Trawler ApS
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as
// published by the Free Software Foundation, either version 3 of the
// License, or (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! Graph persistence behind a narrow contract. The coordinator never
//! depends on storage at runtime; callers save after the crawl and load
//! before an incremental one.

pub mod json;
pub mod memory;
pub mod sqlite;

use crate::graph::dto::GraphDto;
use crate::Result;

pub use json::JsonStorage;
pub use memory::MemoryStorage;
pub use sqlite::SqliteStorage;

pub trait Storage: Send {
    fn save_graph(&mut self, graph: &GraphDto) -> Result<bool>;
    fn load_graph(&mut self) -> Result<Option<GraphDto>>;
    fn exists(&self) -> bool;
    fn clear(&mut self) -> Result<bool>;

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}
