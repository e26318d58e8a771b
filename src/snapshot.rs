use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::fact::Fact;
use crate::network::ReteNetwork;
use crate::rules::RuleDef;

const MAGIC: [u8; 4] = *b"RTRT";
const VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("snapshot io failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("snapshot codec failed: {0}")]
    Codec(#[from] bincode::Error),
    #[error("not a snapshot file (bad magic)")]
    BadMagic,
    #[error("unsupported snapshot version {0}")]
    UnsupportedVersion(u32),
}

/// On-disk form: the source-asserted facts with their source sets, the
/// user rules, and every template-instantiated production. Inferred facts
/// are not stored; replaying the asserted facts through the restored
/// productions re-derives them with fresh token support, which keeps the
/// restored reasoner observably identical to the saved one.
#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    facts: Vec<(Fact, Vec<String>)>,
    user_rules: Vec<RuleDef>,
    installed: Vec<RuleDef>,
}

impl ReteNetwork {
    pub fn save(&self, path: &Path) -> Result<(), SnapshotError> {
        let snapshot = Snapshot {
            facts: self.asserted_facts(),
            user_rules: self.user_rules().to_vec(),
            installed: self.installed_rules().to_vec(),
        };
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        writer.write_all(&MAGIC)?;
        writer.write_all(&VERSION.to_le_bytes())?;
        bincode::serialize_into(&mut writer, &snapshot)?;
        writer.flush()?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<ReteNetwork, SnapshotError> {
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if magic != MAGIC {
            return Err(SnapshotError::BadMagic);
        }
        let mut version = [0u8; 4];
        reader.read_exact(&mut version)?;
        let version = u32::from_le_bytes(version);
        if version != VERSION {
            return Err(SnapshotError::UnsupportedVersion(version));
        }
        let snapshot: Snapshot = bincode::deserialize_from(&mut reader)?;

        let mut net = ReteNetwork::new();
        // Specialized productions come back as live productions first, so
        // replayed facts join them instead of re-deriving through the
        // template meta-rules (installation is idempotent by name either
        // way, which is what keeps the replay from exploding).
        for rule in snapshot.installed {
            net.install_specialized(rule);
        }
        for rule in snapshot.user_rules {
            net.add_rule(rule);
        }
        for (fact, sources) in snapshot.facts {
            for source in sources {
                net.add_fact(fact.clone(), &source);
            }
        }
        Ok(net)
    }
}
