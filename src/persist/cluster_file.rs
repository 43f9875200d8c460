//! The optional `cluster.state` side file used to restore membership across
//! restarts (spec.md §3, §6). Format is key/value lines:
//! `self_id=<n>`, `node_count=<n>`, `node[<i>].id=<n>`, `.name=`, `.ip=`,
//! `.rale_port=`, `.dstore_port=`.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::membership::{NodeId, Peer};

pub struct ClusterFile {
    path: PathBuf,
}

#[derive(Debug, Clone, Default)]
pub struct ClusterSnapshot {
    pub self_id: Option<NodeId>,
    pub nodes: Vec<Peer>,
}

impl ClusterFile {
    pub fn new(state_dir: impl AsRef<Path>) -> Self {
        Self {
            path: state_dir.as_ref().join("cluster.state"),
        }
    }

    pub fn load(&self) -> Result<ClusterSnapshot> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(ClusterSnapshot::default()),
            Err(e) => return Err(Error::PersistError(e.to_string())),
        };

        let mut kv: HashMap<String, String> = HashMap::new();
        for line in contents.lines() {
            if let Some((k, v)) = line.split_once('=') {
                kv.insert(k.to_string(), v.to_string());
            }
        }

        let self_id = kv.get("self_id").and_then(|v| v.parse::<NodeId>().ok());
        let node_count: usize = kv
            .get("node_count")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);

        let mut nodes = Vec::with_capacity(node_count);
        for i in 0..node_count {
            let get = |field: &str| kv.get(&format!("node[{i}].{field}")).cloned();
            let (Some(id), Some(name), Some(ip), Some(rale_port), Some(dstore_port)) = (
                get("id").and_then(|v| v.parse::<NodeId>().ok()),
                get("name"),
                get("ip"),
                get("rale_port").and_then(|v| v.parse::<u16>().ok()),
                get("dstore_port").and_then(|v| v.parse::<u16>().ok()),
            ) else {
                continue;
            };
            nodes.push(Peer::new(id, name, ip, rale_port, dstore_port));
        }

        Ok(ClusterSnapshot { self_id, nodes })
    }

    pub fn save(&self, self_id: NodeId, nodes: &[Peer]) -> Result<()> {
        let mut out = String::new();
        out.push_str(&format!("self_id={self_id}\n"));
        out.push_str(&format!("node_count={}\n", nodes.len()));
        for (i, node) in nodes.iter().enumerate() {
            out.push_str(&format!("node[{i}].id={}\n", node.id));
            out.push_str(&format!("node[{i}].name={}\n", node.name));
            out.push_str(&format!("node[{i}].ip={}\n", node.ip));
            out.push_str(&format!("node[{i}].rale_port={}\n", node.consensus_port));
            out.push_str(&format!("node[{i}].dstore_port={}\n", node.store_port));
        }
        fs::write(&self.path, out).map_err(|e| Error::PersistError(e.to_string()))
    }
}
