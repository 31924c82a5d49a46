use std::fs;
use std::path::Path;

use anyhow::Result;
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row};
use serde::de::DeserializeOwned;

use crate::model::{Content, ContentKind, Volume, WorkRecord, WorkRef};
use crate::parser::Flattened;

pub fn connect(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let conn = Connection::open(path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS volumes (
            volume_number INTEGER PRIMARY KEY,
            title         TEXT NOT NULL,
            updated_at    TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS works (
            code          TEXT PRIMARY KEY,
            volume_number INTEGER NOT NULL REFERENCES volumes(volume_number),
            ordinal       INTEGER NOT NULL,
            siglum        TEXT,
            title         TEXT NOT NULL,
            year          TEXT,
            paragraphs    TEXT NOT NULL,
            sections      TEXT NOT NULL,
            ingested_at   TEXT NOT NULL DEFAULT (datetime('now'))
        );
        CREATE INDEX IF NOT EXISTS idx_works_volume ON works(volume_number, ordinal);

        CREATE TABLE IF NOT EXISTS contents (
            work_code      TEXT NOT NULL REFERENCES works(code),
            ordinal        INTEGER NOT NULL,
            kind           TEXT NOT NULL CHECK(kind IN ('heading','paragraph','footnote','summary')),
            fmt_text       TEXT NOT NULL,
            toc_text       TEXT,
            search_text    TEXT NOT NULL,
            pages          TEXT NOT NULL,
            page_by_index  TEXT NOT NULL,
            line_by_index  TEXT NOT NULL,
            word_index_map TEXT NOT NULL,
            fn_refs        TEXT NOT NULL,
            summary_ref    TEXT,
            ref            TEXT,
            PRIMARY KEY (work_code, ordinal)
        );
        CREATE INDEX IF NOT EXISTS idx_contents_kind ON contents(work_code, kind);
        ",
    )?;
    Ok(())
}

// ── Writing ──

/// Work codes currently stored for a volume.
pub fn work_codes_of_volume(conn: &Connection, volume_number: i32) -> Result<Vec<String>> {
    let mut stmt =
        conn.prepare("SELECT code FROM works WHERE volume_number = ?1 ORDER BY ordinal")?;
    let rows = stmt
        .query_map([volume_number], |row| row.get(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Replaces the works in `flat` (and their contents) in one transaction.
/// With `whole_volume`, works of the volume missing from `flat` are removed
/// as well.
pub fn replace(conn: &Connection, flat: &Flattened, whole_volume: bool) -> Result<()> {
    let tx = conn.unchecked_transaction()?;
    {
        let volume = &flat.volume;
        tx.execute(
            "INSERT INTO volumes (volume_number, title) VALUES (?1, ?2)
             ON CONFLICT(volume_number) DO UPDATE SET title = excluded.title,
                                                      updated_at = datetime('now')",
            rusqlite::params![volume.volume_number, volume.title],
        )?;

        if whole_volume {
            tx.execute(
                "DELETE FROM contents WHERE work_code IN
                 (SELECT code FROM works WHERE volume_number = ?1)",
                [volume.volume_number],
            )?;
            tx.execute(
                "DELETE FROM works WHERE volume_number = ?1",
                [volume.volume_number],
            )?;
        }

        let mut del_contents = tx.prepare("DELETE FROM contents WHERE work_code = ?1")?;
        let mut del_work = tx.prepare("DELETE FROM works WHERE code = ?1")?;
        let mut w_stmt = tx.prepare(
            "INSERT INTO works
             (code, volume_number, ordinal, siglum, title, year, paragraphs, sections)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )?;
        for w in &flat.works {
            del_contents.execute([&w.code])?;
            del_work.execute([&w.code])?;
            w_stmt.execute(rusqlite::params![
                w.code,
                w.volume_number,
                w.ordinal,
                w.siglum,
                w.title,
                w.year,
                serde_json::to_string(&w.paragraphs)?,
                serde_json::to_string(&w.sections)?,
            ])?;
        }

        let mut c_stmt = tx.prepare(
            "INSERT INTO contents
             (work_code, ordinal, kind, fmt_text, toc_text, search_text, pages,
              page_by_index, line_by_index, word_index_map, fn_refs, summary_ref, ref)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13)",
        )?;
        for c in &flat.contents {
            c_stmt.execute(rusqlite::params![
                c.work_code,
                c.ordinal,
                c.kind.as_str(),
                c.fmt_text,
                c.toc_text,
                c.search_text,
                serde_json::to_string(&c.pages)?,
                serde_json::to_string(&c.page_by_index)?,
                serde_json::to_string(&c.line_by_index)?,
                serde_json::to_string(&c.word_index_map)?,
                serde_json::to_string(&c.fn_refs)?,
                c.summary_ref,
                c.reference,
            ])?;
        }
    }
    tx.commit()?;
    Ok(())
}

// ── Reading ──

fn json<T: DeserializeOwned>(row: &Row, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

const WORK_COLUMNS: &str =
    "code, siglum, title, year, ordinal, volume_number, paragraphs, sections";

fn work_row(row: &Row) -> rusqlite::Result<WorkRecord> {
    Ok(WorkRecord {
        code: row.get(0)?,
        siglum: row.get(1)?,
        title: row.get(2)?,
        year: row.get(3)?,
        ordinal: row.get(4)?,
        volume_number: row.get(5)?,
        paragraphs: json(row, 6)?,
        sections: json(row, 7)?,
    })
}

const CONTENT_COLUMNS: &str = "work_code, ordinal, kind, fmt_text, toc_text, search_text, pages,
     page_by_index, line_by_index, word_index_map, fn_refs, summary_ref, ref";

fn content_row(row: &Row) -> rusqlite::Result<Content> {
    let kind: String = row.get(2)?;
    let kind = kind.parse::<ContentKind>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(2, Type::Text, e.into())
    })?;
    Ok(Content {
        work_code: row.get(0)?,
        ordinal: row.get(1)?,
        kind,
        fmt_text: row.get(3)?,
        toc_text: row.get(4)?,
        search_text: row.get(5)?,
        pages: json(row, 6)?,
        page_by_index: json(row, 7)?,
        line_by_index: json(row, 8)?,
        word_index_map: json(row, 9)?,
        fn_refs: json(row, 10)?,
        summary_ref: row.get(11)?,
        reference: row.get(12)?,
    })
}

pub fn fetch_volumes(conn: &Connection) -> Result<Vec<Volume>> {
    let mut stmt =
        conn.prepare("SELECT volume_number, title FROM volumes ORDER BY volume_number")?;
    let mut volumes = stmt
        .query_map([], |row| {
            Ok(Volume {
                volume_number: row.get(0)?,
                title: row.get(1)?,
                works: Vec::new(),
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    for work in fetch_works(conn)? {
        if let Some(v) = volumes
            .iter_mut()
            .find(|v| v.volume_number == work.volume_number)
        {
            v.works.push(WorkRef::from(&work));
        }
    }
    Ok(volumes)
}

pub fn fetch_works(conn: &Connection) -> Result<Vec<WorkRecord>> {
    let sql = format!("SELECT {WORK_COLUMNS} FROM works ORDER BY volume_number, ordinal");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([], work_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn fetch_work(conn: &Connection, code: &str) -> Result<Option<WorkRecord>> {
    let sql = format!("SELECT {WORK_COLUMNS} FROM works WHERE code = ?1");
    Ok(conn.query_row(&sql, [code], work_row).optional()?)
}

/// Contents of one work and kind, optionally restricted to `ordinals`.
pub fn fetch_contents(
    conn: &Connection,
    work_code: &str,
    kind: ContentKind,
    ordinals: Option<&[i32]>,
) -> Result<Vec<Content>> {
    let sql = format!(
        "SELECT {CONTENT_COLUMNS} FROM contents
         WHERE work_code = ?1 AND kind = ?2 ORDER BY ordinal"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(rusqlite::params![work_code, kind.as_str()], content_row)?
        .filter(|r| match (r, ordinals) {
            (Ok(c), Some(wanted)) => wanted.contains(&c.ordinal),
            _ => true,
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Contents for (work code, ordinal) keys, in key order. Unknown keys are skipped.
pub fn fetch_by_keys(conn: &Connection, keys: &[(String, i32)]) -> Result<Vec<Content>> {
    let sql = format!("SELECT {CONTENT_COLUMNS} FROM contents WHERE work_code = ?1 AND ordinal = ?2");
    let mut stmt = conn.prepare(&sql)?;
    let mut contents = Vec::with_capacity(keys.len());
    for (code, ordinal) in keys {
        if let Some(c) = stmt
            .query_row(rusqlite::params![code, ordinal], content_row)
            .optional()?
        {
            contents.push(c);
        }
    }
    Ok(contents)
}

// ── Stats ──

pub struct Stats {
    pub volumes: usize,
    pub works: usize,
    pub contents: usize,
    pub by_kind: Vec<(String, usize)>,
}

pub fn get_stats(conn: &Connection) -> Result<Stats> {
    let volumes: usize = conn.query_row("SELECT COUNT(*) FROM volumes", [], |r| r.get(0))?;
    let works: usize = conn.query_row("SELECT COUNT(*) FROM works", [], |r| r.get(0))?;
    let contents: usize = conn.query_row("SELECT COUNT(*) FROM contents", [], |r| r.get(0))?;
    let mut stmt =
        conn.prepare("SELECT kind, COUNT(*) FROM contents GROUP BY kind ORDER BY kind")?;
    let by_kind = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Stats {
        volumes,
        works,
        contents,
        by_kind,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancelToken;
    use crate::config::Corpus;
    use crate::parser::process_volume;

    fn corpus() -> Corpus {
        Corpus::from_json(
            r#"[{"volumeNumber": 1, "title": "Band 1",
                 "works": [{"code": "W1", "year": "1747"}, {"code": "W2"}]}]"#,
        )
        .unwrap()
    }

    const TWO_WORKS: &str = r#"<band nr="1"><hauptteil>
        <seite nr="1"/><h1>Erstes</h1><p>Vernunft<fr seite="1" nr="1"/></p>
        <seite nr="2"/><h1>Zweites</h1><h2>Kapitel</h2><p>Erfahrung</p>
        </hauptteil><fussnoten><fn seite="1" nr="1">Anm.</fn></fussnoten></band>"#;

    fn flat(xml: &str) -> Flattened {
        process_volume(xml.as_bytes(), Some(1), &corpus(), &CancelToken::new()).unwrap()
    }

    fn db() -> (tempfile::TempDir, Connection) {
        let dir = tempfile::tempdir().unwrap();
        let conn = connect(&dir.path().join("nested/test.sqlite")).unwrap();
        init_schema(&conn).unwrap();
        (dir, conn)
    }

    #[test]
    fn volume_round_trip() {
        let (_dir, conn) = db();
        let flat = flat(TWO_WORKS);
        replace(&conn, &flat, true).unwrap();

        let volumes = fetch_volumes(&conn).unwrap();
        assert_eq!(volumes.len(), 1);
        let codes: Vec<_> = volumes[0].works.iter().map(|w| w.code.as_str()).collect();
        assert_eq!(codes, vec!["W1", "W2"]);

        let w2 = fetch_work(&conn, "W2").unwrap().unwrap();
        assert_eq!(w2, flat.works[1]);
        assert!(fetch_work(&conn, "W9").unwrap().is_none());

        let footnotes = fetch_contents(&conn, "W1", ContentKind::Footnote, None).unwrap();
        assert_eq!(footnotes.len(), 1);
        let stored = flat
            .contents
            .iter()
            .find(|c| c.work_code == "W1" && c.kind == ContentKind::Footnote)
            .unwrap();
        assert_eq!(&footnotes[0], stored);
    }

    #[test]
    fn ordinal_filter() {
        let (_dir, conn) = db();
        replace(&conn, &flat(TWO_WORKS), true).unwrap();
        let all = fetch_contents(&conn, "W2", ContentKind::Paragraph, None).unwrap();
        assert_eq!(all.len(), 1);
        let none = fetch_contents(&conn, "W2", ContentKind::Paragraph, Some(&[99])).unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn replacing_one_work_keeps_the_other() {
        let (_dir, conn) = db();
        replace(&conn, &flat(TWO_WORKS), true).unwrap();
        let before = get_stats(&conn).unwrap();

        let only = flat(TWO_WORKS).only_work("W2").unwrap();
        replace(&conn, &only, false).unwrap();
        let after = get_stats(&conn).unwrap();
        assert_eq!(before.contents, after.contents);
        assert_eq!(after.works, 2);
    }

    #[test]
    fn replacing_volume_drops_vanished_works() {
        let (_dir, conn) = db();
        replace(&conn, &flat(TWO_WORKS), true).unwrap();
        let one = flat(r#"<band nr="1"><hauptteil><h1>Nur</h1><p>x</p></hauptteil></band>"#);
        replace(&conn, &one, true).unwrap();
        assert_eq!(work_codes_of_volume(&conn, 1).unwrap(), vec!["W1"]);
        assert!(fetch_contents(&conn, "W2", ContentKind::Paragraph, None)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn keys_in_request_order() {
        let (_dir, conn) = db();
        replace(&conn, &flat(TWO_WORKS), true).unwrap();
        let keys = vec![("W2".to_string(), 1), ("W1".to_string(), 1), ("W1".to_string(), 50)];
        let found = fetch_by_keys(&conn, &keys).unwrap();
        let got: Vec<_> = found.iter().map(|c| (c.work_code.as_str(), c.ordinal)).collect();
        assert_eq!(got, vec![("W2", 1), ("W1", 1)]);
    }
}
