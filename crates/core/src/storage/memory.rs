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

use super::Storage;
use crate::graph::dto::GraphDto;
use crate::Result;

#[derive(Default)]
pub struct MemoryStorage {
    graph: Option<GraphDto>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for MemoryStorage {
    fn save_graph(&mut self, graph: &GraphDto) -> Result<bool> {
        self.graph = Some(graph.clone());
        Ok(true)
    }

    fn load_graph(&mut self) -> Result<Option<GraphDto>> {
        Ok(self.graph.clone())
    }

    fn exists(&self) -> bool {
        self.graph.is_some()
    }

    fn clear(&mut self) -> Result<bool> {
        Ok(self.graph.take().is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Graph;
    use crate::node::Node;
    use url::Url;

    #[test]
    fn save_load_clear() {
        let mut graph = Graph::new();
        graph.add_node(
            Node::new(Url::parse("https://example.com/").unwrap(), 0, None),
            false,
        );
        let dto = GraphDto::from_graph(&graph);

        let mut storage = MemoryStorage::new();
        assert!(!storage.exists());
        assert_eq!(storage.load_graph().unwrap(), None);

        assert!(storage.save_graph(&dto).unwrap());
        assert!(storage.exists());
        assert_eq!(storage.load_graph().unwrap().unwrap(), dto);

        assert!(storage.clear().unwrap());
        assert!(!storage.exists());
        assert!(!storage.clear().unwrap());
    }
}
