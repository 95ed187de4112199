//! Binary persistence of a compiled knowledge base.
//!
//! A knowledge-base directory holds one table per concern:
//!
//! ```text
//! compiled/
//!   predicates.tbl   interned names in id order
//!   axioms.tbl       axiom records
//!   lhs.idx          predicate id -> axiom ids (LHS occurrences)
//!   rhs.idx          predicate id -> axiom ids (RHS occurrences)
//!   properties.tbl   predicate id -> property flags
//!   distances.tbl    sparse symmetric distance matrix
//! ```
//!
//! ## Table layout
//!
//! Every table is `magic "DAVK" | u32 version | u32 record count | payload |
//! u32 crc32(payload)`, all integers little-endian, payload bincode-encoded.
//! Loading verifies magic, version, count, and checksum before decoding, so
//! a truncated or bit-flipped file fails loudly instead of producing a
//! silently wrong rule base.

use super::{Axiom, AxiomId, KbError, KbResult, KnowledgeBase, PredicateId, PredicateLibrary, PropertySet};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

const MAGIC: &[u8; 4] = b"DAVK";
const VERSION: u32 = 1;

const PREDICATES_TBL: &str = "predicates.tbl";
const AXIOMS_TBL: &str = "axioms.tbl";
const LHS_IDX: &str = "lhs.idx";
const RHS_IDX: &str = "rhs.idx";
const PROPERTIES_TBL: &str = "properties.tbl";
const DISTANCES_TBL: &str = "distances.tbl";

fn write_table<R: Serialize>(path: &Path, records: &[R]) -> KbResult<()> {
    let payload = bincode::serialize(records)?;
    let mut bytes = Vec::with_capacity(payload.len() + 16);
    bytes.extend_from_slice(MAGIC);
    bytes.extend_from_slice(&VERSION.to_le_bytes());
    bytes.extend_from_slice(&(records.len() as u32).to_le_bytes());
    bytes.extend_from_slice(&payload);
    bytes.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
    fs::write(path, bytes)?;
    Ok(())
}

fn read_table<R: DeserializeOwned>(path: &Path) -> KbResult<Vec<R>> {
    let corrupt = |reason: &str| KbError::Corrupt {
        path: path.display().to_string(),
        reason: reason.to_string(),
    };

    let bytes = fs::read(path)?;
    if bytes.len() < 16 || &bytes[0..4] != MAGIC {
        return Err(corrupt("bad magic"));
    }
    let version = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    if version != VERSION {
        return Err(corrupt(&format!("unsupported version {version}")));
    }
    let count = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]) as usize;

    let payload = &bytes[12..bytes.len() - 4];
    let stored_crc = u32::from_le_bytes(
        bytes[bytes.len() - 4..]
            .try_into()
            .map_err(|_| corrupt("short trailer"))?,
    );
    if crc32fast::hash(payload) != stored_crc {
        return Err(corrupt("checksum mismatch"));
    }

    let records: Vec<R> = bincode::deserialize(payload)?;
    if records.len() != count {
        return Err(corrupt(&format!(
            "record count mismatch: header {count}, payload {}",
            records.len()
        )));
    }
    Ok(records)
}

/// Persist a compiled knowledge base into `dir` (created if missing).
pub fn save(kb: &KnowledgeBase, dir: &Path) -> KbResult<()> {
    fs::create_dir_all(dir)?;

    write_table(&dir.join(PREDICATES_TBL), &kb.library().names())?;
    write_table(&dir.join(AXIOMS_TBL), kb.axioms())?;

    let mut lhs: Vec<(PredicateId, Vec<AxiomId>)> = kb
        .lhs_index()
        .iter()
        .map(|(k, v)| (*k, v.clone()))
        .collect();
    lhs.sort_unstable_by_key(|(pid, _)| *pid);
    write_table(&dir.join(LHS_IDX), &lhs)?;

    let mut rhs: Vec<(PredicateId, Vec<AxiomId>)> = kb
        .rhs_index()
        .iter()
        .map(|(k, v)| (*k, v.clone()))
        .collect();
    rhs.sort_unstable_by_key(|(pid, _)| *pid);
    write_table(&dir.join(RHS_IDX), &rhs)?;

    let mut props: Vec<(PredicateId, PropertySet)> = kb
        .properties()
        .iter()
        .map(|(k, v)| (*k, *v))
        .collect();
    props.sort_unstable_by_key(|(pid, _)| *pid);
    write_table(&dir.join(PROPERTIES_TBL), &props)?;

    let mut dists: Vec<(PredicateId, PredicateId, f32)> = kb
        .distances()
        .iter()
        .map(|(&(a, b), &d)| (a, b, d))
        .collect();
    dists.sort_unstable_by_key(|&(a, b, _)| (a, b));
    write_table(&dir.join(DISTANCES_TBL), &dists)?;

    debug!(
        dir = %dir.display(),
        axioms = kb.num_axioms(),
        predicates = kb.library().len(),
        distances = kb.distances().len(),
        "knowledge base saved"
    );
    Ok(())
}

/// Load a knowledge base from `dir` into the given predicate library.
///
/// Stored predicate ids are remapped through the library, so loading into a
/// library that already holds other interned names stays correct.
pub fn load(dir: &Path, library: Arc<PredicateLibrary>) -> KbResult<KnowledgeBase> {
    let names: Vec<String> = read_table(&dir.join(PREDICATES_TBL))?;
    let remap: Vec<PredicateId> = names.iter().map(|n| library.intern(n)).collect();
    let remapped = |old: PredicateId, path: &str| -> KbResult<PredicateId> {
        remap
            .get(old as usize)
            .copied()
            .ok_or_else(|| KbError::Corrupt {
                path: dir.join(path).display().to_string(),
                reason: format!("predicate id {old} out of range"),
            })
    };

    let mut kb = KnowledgeBase::new(library);

    let axioms: Vec<Axiom> = read_table(&dir.join(AXIOMS_TBL))?;
    for (i, axiom) in axioms.iter().enumerate() {
        if axiom.id != i as AxiomId {
            return Err(KbError::Corrupt {
                path: dir.join(AXIOMS_TBL).display().to_string(),
                reason: format!("axiom id {} at position {i}", axiom.id),
            });
        }
    }
    kb.axioms = axioms;

    let lhs: Vec<(PredicateId, Vec<AxiomId>)> = read_table(&dir.join(LHS_IDX))?;
    for (pid, ids) in lhs {
        kb.lhs_index.insert(remapped(pid, LHS_IDX)?, ids);
    }
    let rhs: Vec<(PredicateId, Vec<AxiomId>)> = read_table(&dir.join(RHS_IDX))?;
    for (pid, ids) in rhs {
        kb.rhs_index.insert(remapped(pid, RHS_IDX)?, ids);
    }

    let props: Vec<(PredicateId, PropertySet)> = read_table(&dir.join(PROPERTIES_TBL))?;
    for (pid, set) in props {
        kb.properties.insert(remapped(pid, PROPERTIES_TBL)?, set);
    }

    let dists: Vec<(PredicateId, PredicateId, f32)> = read_table(&dir.join(DISTANCES_TBL))?;
    let mut distances = HashMap::with_capacity(dists.len());
    for (a, b, d) in dists {
        let (a, b) = (remapped(a, DISTANCES_TBL)?, remapped(b, DISTANCES_TBL)?);
        distances.insert((a.min(b), a.max(b)), d);
    }
    kb.distances = distances;

    debug!(
        dir = %dir.display(),
        axioms = kb.num_axioms(),
        "knowledge base loaded"
    );
    Ok(kb)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Statement;
    use crate::parser::parse_statements;
    use tempfile::TempDir;

    fn compile(src: &str) -> KnowledgeBase {
        let lib = PredicateLibrary::new();
        let mut kb = KnowledgeBase::new(lib);
        for stmt in parse_statements(src).expect("parse") {
            match stmt {
                Statement::Rule(r) => {
                    kb.add_rule(r);
                }
                Statement::Property(p) => kb.add_property(&p),
                Statement::Problem(_) => {}
            }
        }
        kb.finalize(None);
        kb
    }

    const KB_SRC: &str = "\
        rule r1 { eat(E, X, Y) ^ man(X) => apple(Y) }\n\
        rule r2 { {apple(Y)}:0.7 => fruit(Y) }\n\
        property parent/2 { asymmetric, irreflexive }\n";

    #[test]
    fn save_load_roundtrip_is_bit_exact() {
        let kb = compile(KB_SRC);
        let dir = TempDir::new().expect("tempdir");
        save(&kb, dir.path()).expect("save");

        let lib2 = PredicateLibrary::new();
        let loaded = load(dir.path(), lib2).expect("load");

        assert_eq!(loaded.num_axioms(), kb.num_axioms());
        assert_eq!(loaded.axioms(), kb.axioms());

        // Distance queries must come back bit-for-bit.
        for (&(a, b), &d) in kb.distances() {
            let an = kb.library().name(a);
            let bn = kb.library().name(b);
            let la = loaded.library().lookup(&an).expect("predicate survived");
            let lb = loaded.library().lookup(&bn).expect("predicate survived");
            assert_eq!(loaded.distance(la, lb).to_bits(), d.to_bits());
        }

        // Properties survive too.
        let parent = loaded.library().lookup("parent/2").expect("parent/2");
        assert!(loaded.property(parent).asymmetric);
        assert!(loaded.property(parent).irreflexive);
    }

    #[test]
    fn load_remaps_into_a_nonempty_library() {
        let kb = compile(KB_SRC);
        let dir = TempDir::new().expect("tempdir");
        save(&kb, dir.path()).expect("save");

        let lib2 = PredicateLibrary::new();
        lib2.intern("unrelated/5");
        lib2.intern("noise/2");
        let loaded = load(dir.path(), lib2).expect("load");

        let eat = loaded.library().lookup("eat/3").expect("eat/3");
        let apple = loaded.library().lookup("apple/1").expect("apple/1");
        assert_eq!(loaded.axioms_with_lhs(eat), &[0]);
        assert_eq!(loaded.axioms_with_rhs(apple), &[0]);
    }

    #[test]
    fn corrupt_payload_is_detected() {
        let kb = compile(KB_SRC);
        let dir = TempDir::new().expect("tempdir");
        save(&kb, dir.path()).expect("save");

        let path = dir.path().join(AXIOMS_TBL);
        let mut bytes = fs::read(&path).expect("read");
        let mid = bytes.len() / 2;
        bytes[mid] ^= 0xff;
        fs::write(&path, bytes).expect("write");

        let lib2 = PredicateLibrary::new();
        let err = load(dir.path(), lib2).expect_err("must fail");
        assert!(matches!(err, KbError::Corrupt { .. }), "{err}");
    }

    #[test]
    fn missing_directory_is_an_io_error() {
        let lib = PredicateLibrary::new();
        let err = load(Path::new("/nonexistent/davkb"), lib).expect_err("must fail");
        assert!(matches!(err, KbError::Io(_)), "{err}");
    }
}
