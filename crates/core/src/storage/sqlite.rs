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

//! SQLite-backed storage. Node and edge records are stored as JSON
//! documents with an explicit position column, keeping load order equal to
//! insertion order.

use std::path::Path;

use rusqlite::Connection;

use super::Storage;
use crate::graph::dto::{EdgeDto, GraphDto, NodeDto};
use crate::Result;

pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::init(&conn)?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init(&conn)?;
        Ok(Self { conn })
    }

    fn init(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS nodes (
                position INTEGER PRIMARY KEY,
                node_id  TEXT NOT NULL UNIQUE,
                doc      TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS edges (
                position INTEGER PRIMARY KEY,
                edge_id  TEXT NOT NULL UNIQUE,
                doc      TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS meta (
                key TEXT PRIMARY KEY,
                doc TEXT NOT NULL
            );
            "#,
        )?;
        Ok(())
    }
}

impl Storage for SqliteStorage {
    fn save_graph(&mut self, graph: &GraphDto) -> Result<bool> {
        let tx = self.conn.transaction()?;

        tx.execute("DELETE FROM nodes", [])?;
        tx.execute("DELETE FROM edges", [])?;
        tx.execute("DELETE FROM meta", [])?;

        {
            let mut insert_node =
                tx.prepare("INSERT INTO nodes (position, node_id, doc) VALUES (?1, ?2, ?3)")?;
            for (position, node) in graph.nodes.iter().enumerate() {
                insert_node.execute((
                    position as i64,
                    node.node_id.to_string(),
                    serde_json::to_string(node)?,
                ))?;
            }

            let mut insert_edge =
                tx.prepare("INSERT INTO edges (position, edge_id, doc) VALUES (?1, ?2, ?3)")?;
            for (position, edge) in graph.edges.iter().enumerate() {
                insert_edge.execute((
                    position as i64,
                    edge.edge_id.to_string(),
                    serde_json::to_string(edge)?,
                ))?;
            }

            tx.execute(
                "INSERT INTO meta (key, doc) VALUES ('stats', ?1)",
                [serde_json::to_string(&graph.stats)?],
            )?;
        }

        tx.commit()?;
        Ok(true)
    }

    fn load_graph(&mut self) -> Result<Option<GraphDto>> {
        if !self.exists() {
            return Ok(None);
        }

        let mut nodes_stmt = self
            .conn
            .prepare("SELECT doc FROM nodes ORDER BY position")?;
        let nodes: Vec<NodeDto> = nodes_stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?
            .iter()
            .map(|doc| serde_json::from_str(doc))
            .collect::<Result<_, _>>()?;

        let mut edges_stmt = self
            .conn
            .prepare("SELECT doc FROM edges ORDER BY position")?;
        let edges: Vec<EdgeDto> = edges_stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?
            .iter()
            .map(|doc| serde_json::from_str(doc))
            .collect::<Result<_, _>>()?;

        let stats = self
            .conn
            .query_row("SELECT doc FROM meta WHERE key = 'stats'", [], |row| {
                row.get::<_, String>(0)
            })
            .ok()
            .and_then(|doc| serde_json::from_str(&doc).ok())
            .unwrap_or_default();

        Ok(Some(GraphDto {
            nodes,
            edges,
            stats,
        }))
    }

    fn exists(&self) -> bool {
        self.conn
            .query_row("SELECT COUNT(*) FROM nodes", [], |row| {
                row.get::<_, i64>(0)
            })
            .map(|count| count > 0)
            .unwrap_or(false)
    }

    fn clear(&mut self) -> Result<bool> {
        let had_rows = self.exists();
        self.conn.execute("DELETE FROM nodes", [])?;
        self.conn.execute("DELETE FROM edges", [])?;
        self.conn.execute("DELETE FROM meta", [])?;
        Ok(had_rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Edge, Graph};
    use crate::node::Node;
    use url::Url;

    #[test]
    fn round_trip_in_memory() {
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
        let dto = GraphDto::from_graph(&graph);

        let mut storage = SqliteStorage::open_in_memory().unwrap();
        assert!(!storage.exists());
        assert_eq!(storage.load_graph().unwrap(), None);

        storage.save_graph(&dto).unwrap();
        assert!(storage.exists());

        let loaded = storage.load_graph().unwrap().unwrap();
        assert_eq!(loaded, dto);

        assert!(storage.clear().unwrap());
        assert!(!storage.exists());
    }

    #[test]
    fn load_preserves_node_order() {
        let mut graph = Graph::new();
        for i in 0..20 {
            graph.add_node(
                Node::new(
                    Url::parse(&format!("https://example.com/{i}")).unwrap(),
                    0,
                    None,
                ),
                false,
            );
        }
        let dto = GraphDto::from_graph(&graph);

        let mut storage = SqliteStorage::open_in_memory().unwrap();
        storage.save_graph(&dto).unwrap();
        let loaded = storage.load_graph().unwrap().unwrap();

        let urls: Vec<_> = loaded.nodes.iter().map(|n| n.url.clone()).collect();
        let expected: Vec<_> = dto.nodes.iter().map(|n| n.url.clone()).collect();
        assert_eq!(urls, expected);
    }
}
