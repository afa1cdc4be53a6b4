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

//! JSON file storage. Node records are written in insertion order, so
//! re-saving an unchanged graph produces an identical file.

use std::path::PathBuf;

use super::Storage;
use crate::graph::dto::GraphDto;
use crate::Result;

pub struct JsonStorage {
    path: PathBuf,
}

impl JsonStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Storage for JsonStorage {
    fn save_graph(&mut self, graph: &GraphDto) -> Result<bool> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let body = serde_json::to_vec_pretty(graph)?;

        // write-then-rename so a crash never leaves a half-written graph
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, body)?;
        std::fs::rename(&tmp, &self.path)?;

        Ok(true)
    }

    fn load_graph(&mut self) -> Result<Option<GraphDto>> {
        if !self.path.exists() {
            return Ok(None);
        }

        let body = std::fs::read(&self.path)?;
        Ok(Some(serde_json::from_slice(&body)?))
    }

    fn exists(&self) -> bool {
        self.path.exists()
    }

    fn clear(&mut self) -> Result<bool> {
        if !self.path.exists() {
            return Ok(false);
        }

        std::fs::remove_file(&self.path)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Edge, Graph};
    use crate::node::Node;
    use url::Url;

    fn sample_dto() -> GraphDto {
        let mut graph = Graph::new();
        let a = graph.add_node(
            Node::new(Url::parse("https://example.com/").unwrap(), 0, None),
            false,
        );
        let b = graph.add_node(
            Node::new(Url::parse("https://example.com/a").unwrap(), 1, None),
            false,
        );
        graph.add_edge(Edge::new(a, b));
        GraphDto::from_graph(&graph)
    }

    #[test]
    fn round_trip() {
        let path = crate::gen_temp_path().with_extension("json");
        let mut storage = JsonStorage::new(&path);

        assert!(!storage.exists());

        let dto = sample_dto();
        storage.save_graph(&dto).unwrap();
        assert!(storage.exists());

        let loaded = storage.load_graph().unwrap().unwrap();
        assert_eq!(loaded, dto);

        storage.clear().unwrap();
        assert!(!storage.exists());
    }

    #[test]
    fn saving_twice_produces_identical_files() {
        let path = crate::gen_temp_path().with_extension("json");
        let mut storage = JsonStorage::new(&path);

        let dto = sample_dto();
        storage.save_graph(&dto).unwrap();
        let first = std::fs::read(&path).unwrap();

        storage.save_graph(&dto).unwrap();
        let second = std::fs::read(&path).unwrap();

        assert_eq!(first, second);
        storage.clear().unwrap();
    }
}
