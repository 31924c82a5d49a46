//! Persisting pipeline output to SQLite and the search index together.

use std::collections::BTreeSet;

use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

use crate::db;
use crate::index::SearchIndex;
use crate::parser::Flattened;

#[derive(Debug, Clone, PartialEq)]
pub enum Scope {
    /// Every work of the volume is replaced; works no longer present vanish.
    Volume,
    /// Only the works contained in the output are replaced.
    Works,
}

/// Index changes are staged first, then SQLite commits, then the index
/// commits. A failed SQLite commit drops the staged index changes.
pub fn persist(
    conn: &Connection,
    index: &SearchIndex,
    flat: &Flattened,
    scope: Scope,
) -> Result<()> {
    let mut replaced: BTreeSet<String> = flat.works.iter().map(|w| w.code.clone()).collect();
    if scope == Scope::Volume {
        replaced.extend(db::work_codes_of_volume(conn, flat.volume.volume_number)?);
    }
    let replaced: Vec<String> = replaced.into_iter().collect();

    let writer = index.stage(&replaced, &flat.contents)?;
    db::replace(conn, flat, scope == Scope::Volume)?;
    index.commit(writer)?;

    info!(
        volume = flat.volume.volume_number,
        works = flat.works.len(),
        contents = flat.contents.len(),
        "persisted"
    );
    Ok(())
}
