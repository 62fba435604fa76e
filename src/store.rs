//! Local inventory access (Calibre library).
//!
//! Reads books as [`LocalItem`]s and writes [`MetadataPatch`]es back into a
//! Calibre `metadata.db`. Every patch is applied in one transaction.
//!
//! Calibre's own triggers call a `title_sort()` SQL function that only
//! exists inside Calibre, so the adapter registers an equivalent one on
//! every connection it opens.

use std::path::{Path, PathBuf};

use chrono::Utc;
use rusqlite::functions::FunctionFlags;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Transaction};
use rustc_hash::FxHashMap;
use thiserror::Error;

use crate::models::{ItemId, LocalItem, MetadataPatch};
use crate::normalize::{author_to_sort, title_sort};

/// Database file inside a Calibre library directory
pub const CALIBRE_DB_FILE: &str = "metadata.db";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no item with id {0}")]
    NotFound(ItemId),

    #[error("failed to open library {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("library database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Inventory operations used by the update stage.
pub trait InventoryStore {
    /// Items whose series name equals `name`.
    fn list_by_series(&self, name: &str) -> Result<Vec<LocalItem>, StoreError>;

    /// Every item in the inventory.
    fn list_all(&self) -> Result<Vec<LocalItem>, StoreError>;

    /// Items that belong to no series.
    fn list_without_series(&self) -> Result<Vec<LocalItem>, StoreError>;

    /// Distinct series names present in the inventory.
    fn list_series(&self) -> Result<Vec<String>, StoreError>;

    /// Apply a patch to one item, entirely or not at all.
    fn apply_patch(&mut self, id: ItemId, patch: &MetadataPatch) -> Result<(), StoreError>;
}

// ============================================================================
// Calibre Library
// ============================================================================

const SELECT_BOOKS: &str = "SELECT b.id, b.title, s.name, b.series_index
     FROM books b
     LEFT JOIN books_series_link bsl ON bsl.book = b.id
     LEFT JOIN series s ON s.id = bsl.series";

enum BookFilter<'a> {
    All,
    Series(&'a str),
    NoSeries,
}

pub struct CalibreLibrary {
    conn: Connection,
}

impl CalibreLibrary {
    /// Open a library given either its directory or its database file.
    /// The database must already exist.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let db_path = Self::database_path(path);
        let conn = Connection::open_with_flags(
            &db_path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|source| StoreError::Open {
            path: db_path.display().to_string(),
            source,
        })?;
        Self::from_connection(conn)
    }

    /// Wrap an open connection (used with in-memory databases in tests).
    pub fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        register_functions(&conn)?;
        Ok(Self { conn })
    }

    pub fn database_path(path: &Path) -> PathBuf {
        if path.is_dir() {
            path.join(CALIBRE_DB_FILE)
        } else {
            path.to_path_buf()
        }
    }

    fn list(&self, filter: BookFilter<'_>) -> Result<Vec<LocalItem>, StoreError> {
        let mut authors = self.authors_by_book()?;

        let sql = match filter {
            BookFilter::All => format!("{} ORDER BY b.id", SELECT_BOOKS),
            BookFilter::Series(_) => format!("{} WHERE s.name = ?1 COLLATE BINARY ORDER BY b.id", SELECT_BOOKS),
            BookFilter::NoSeries => format!("{} WHERE bsl.book IS NULL ORDER BY b.id", SELECT_BOOKS),
        };
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = match filter {
            BookFilter::Series(name) => stmt.query([name])?,
            _ => stmt.query([])?,
        };

        let mut items = Vec::new();
        while let Some(row) = rows.next()? {
            let id: ItemId = row.get(0)?;
            let series_name: Option<String> = row.get(2)?;
            // A seriesless book still has Calibre's default index; it is not a hint.
            let series_index_hint: Option<f64> = match series_name {
                Some(_) => row.get(3)?,
                None => None,
            };
            items.push(LocalItem {
                id,
                title: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                series_name,
                series_index_hint,
                author_names: authors.remove(&id).unwrap_or_default(),
            });
        }
        Ok(items)
    }

    /// Author names per book, in Calibre's link order.
    fn authors_by_book(&self) -> Result<FxHashMap<ItemId, Vec<String>>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT bal.book, a.name
             FROM books_authors_link bal
             JOIN authors a ON a.id = bal.author
             ORDER BY bal.book, bal.id",
        )?;
        let mut rows = stmt.query([])?;
        let mut authors: FxHashMap<ItemId, Vec<String>> = FxHashMap::default();
        while let Some(row) = rows.next()? {
            let book: ItemId = row.get(0)?;
            let name: String = row.get(1)?;
            authors.entry(book).or_default().push(name);
        }
        Ok(authors)
    }
}

impl InventoryStore for CalibreLibrary {
    fn list_by_series(&self, name: &str) -> Result<Vec<LocalItem>, StoreError> {
        self.list(BookFilter::Series(name))
    }

    fn list_all(&self) -> Result<Vec<LocalItem>, StoreError> {
        self.list(BookFilter::All)
    }

    fn list_without_series(&self) -> Result<Vec<LocalItem>, StoreError> {
        self.list(BookFilter::NoSeries)
    }

    fn list_series(&self) -> Result<Vec<String>, StoreError> {
        let mut stmt = self.conn.prepare("SELECT name FROM series ORDER BY name")?;
        let names = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(names)
    }

    fn apply_patch(&mut self, id: ItemId, patch: &MetadataPatch) -> Result<(), StoreError> {
        // Dropping the transaction on any early return rolls it back.
        let tx = self.conn.transaction()?;

        let pubdate = format!("{} 00:00:00+00:00", patch.publish_date.format("%Y-%m-%d"));
        let modified = Utc::now().format("%Y-%m-%d %H:%M:%S%.6f+00:00").to_string();
        let author_sort = Some(patch.author_sort.as_str()).filter(|s| !s.is_empty());
        let updated = tx.execute(
            "UPDATE books
             SET title = ?1, sort = ?2, series_index = ?3, pubdate = ?4,
                 author_sort = COALESCE(?5, author_sort), last_modified = ?6
             WHERE id = ?7",
            params![
                patch.title,
                patch.title_sort,
                patch.series_index,
                pubdate,
                author_sort,
                modified,
                id
            ],
        )?;
        if updated == 0 {
            return Err(StoreError::NotFound(id));
        }

        let series_id = upsert_named(&tx, "series", &patch.series_name, &title_sort(&patch.series_name))?;
        tx.execute("DELETE FROM books_series_link WHERE book = ?1", [id])?;
        tx.execute(
            "INSERT INTO books_series_link (book, series) VALUES (?1, ?2)",
            params![id, series_id],
        )?;

        tx.execute("DELETE FROM books_publishers_link WHERE book = ?1", [id])?;
        if !patch.publisher.is_empty() {
            let publisher_id = upsert_named(&tx, "publishers", &patch.publisher, &patch.publisher)?;
            tx.execute(
                "INSERT INTO books_publishers_link (book, publisher) VALUES (?1, ?2)",
                params![id, publisher_id],
            )?;
        }

        // Calibre books always keep at least one author
        if !patch.authors.is_empty() {
            tx.execute("DELETE FROM books_authors_link WHERE book = ?1", [id])?;
            for author in &patch.authors {
                let author_id = upsert_named(&tx, "authors", author, &author_to_sort(author))?;
                tx.execute(
                    "INSERT OR IGNORE INTO books_authors_link (book, author) VALUES (?1, ?2)",
                    params![id, author_id],
                )?;
            }
        }

        if patch.synopsis.is_empty() {
            tx.execute("DELETE FROM comments WHERE book = ?1", [id])?;
        } else {
            tx.execute(
                "INSERT INTO comments (book, text) VALUES (?1, ?2)
                 ON CONFLICT(book) DO UPDATE SET text = excluded.text",
                params![id, patch.synopsis],
            )?;
        }

        tx.commit()?;
        Ok(())
    }
}

/// Id of the row named `name` in a Calibre name table, inserting it first
/// when missing. Names compare case-insensitively (NOCASE columns).
fn upsert_named(tx: &Transaction<'_>, table: &str, name: &str, sort: &str) -> Result<i64, StoreError> {
    let select = format!("SELECT id FROM {} WHERE name = ?1", table);
    if let Some(id) = tx.query_row(&select, [name], |row| row.get(0)).optional()? {
        return Ok(id);
    }
    tx.execute(
        &format!("INSERT INTO {} (name, sort) VALUES (?1, ?2)", table),
        params![name, sort],
    )?;
    Ok(tx.last_insert_rowid())
}

fn register_functions(conn: &Connection) -> Result<(), StoreError> {
    conn.create_scalar_function(
        "title_sort",
        1,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let title: Option<String> = ctx.get(0)?;
            Ok(title.map(|t| title_sort(&t)))
        },
    )?;
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    /// The subset of Calibre's schema the adapter touches, including the
    /// title trigger that depends on `title_sort()`.
    const SCHEMA: &str = "
        CREATE TABLE books (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            title TEXT NOT NULL DEFAULT 'Unknown' COLLATE NOCASE,
            sort TEXT COLLATE NOCASE,
            pubdate TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
            series_index REAL NOT NULL DEFAULT 1.0,
            author_sort TEXT COLLATE NOCASE,
            last_modified TIMESTAMP NOT NULL DEFAULT '2000-01-01 00:00:00+00:00'
        );
        CREATE TABLE authors (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL COLLATE NOCASE,
            sort TEXT COLLATE NOCASE,
            link TEXT NOT NULL DEFAULT '',
            UNIQUE(name)
        );
        CREATE TABLE books_authors_link (
            id INTEGER PRIMARY KEY,
            book INTEGER NOT NULL,
            author INTEGER NOT NULL,
            UNIQUE(book, author)
        );
        CREATE TABLE series (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL COLLATE NOCASE,
            sort TEXT COLLATE NOCASE,
            link TEXT NOT NULL DEFAULT '',
            UNIQUE (name)
        );
        CREATE TABLE books_series_link (
            id INTEGER PRIMARY KEY,
            book INTEGER NOT NULL,
            series INTEGER NOT NULL,
            UNIQUE(book)
        );
        CREATE TABLE publishers (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL COLLATE NOCASE,
            sort TEXT COLLATE NOCASE,
            link TEXT NOT NULL DEFAULT '',
            UNIQUE(name)
        );
        CREATE TABLE books_publishers_link (
            id INTEGER PRIMARY KEY,
            book INTEGER NOT NULL,
            publisher INTEGER NOT NULL,
            UNIQUE(book)
        );
        CREATE TABLE comments (
            id INTEGER PRIMARY KEY,
            book INTEGER NOT NULL,
            text TEXT NOT NULL COLLATE NOCASE,
            UNIQUE(book)
        );
        CREATE TRIGGER books_update_trg AFTER UPDATE ON books
        BEGIN
            UPDATE books SET sort = title_sort(NEW.title)
            WHERE id = NEW.id AND OLD.title <> NEW.title;
        END;

        INSERT INTO books (id, title, series_index) VALUES
            (1, 'Black Company #1', 1.0),
            (2, 'Untitled', 4.0),
            (3, 'Loose book', 1.0),
            (4, 'Another', 1.0);
        INSERT INTO series (id, name, sort) VALUES (1, 'The Black Company', 'Black Company, The');
        INSERT INTO books_series_link (book, series) VALUES (1, 1), (2, 1);
        INSERT INTO authors (id, name, sort) VALUES
            (1, 'Glen Cook', 'Cook, Glen'),
            (2, '#9 Someone', '#9 Someone');
        INSERT INTO books_authors_link (book, author) VALUES (2, 2), (2, 1), (1, 1);
    ";

    fn library() -> CalibreLibrary {
        let conn = Connection::open_in_memory().unwrap();
        let library = CalibreLibrary::from_connection(conn).unwrap();
        library.conn.execute_batch(SCHEMA).unwrap();
        library
    }

    fn patch() -> MetadataPatch {
        MetadataPatch {
            title: "The Black Company - Vol. 3: Shadows".into(),
            title_sort: "Black Company - Vol. 3: Shadows, The".into(),
            series_name: "The Black Company".into(),
            series_index: 3.0,
            synopsis: "<p>Synopsis</p>".into(),
            authors: vec!["Glen Cook".into(), "Sam Artist".into()],
            author_sort: "Cook, Glen & Artist, Sam".into(),
            publish_date: NaiveDate::from_ymd_opt(1987, 5, 1).unwrap(),
            publisher: "Tor".into(),
        }
    }

    #[test]
    fn test_list_by_series() {
        let lib = library();
        let items = lib.list_by_series("The Black Company").unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].id, 1);
        assert_eq!(items[0].author_names, vec!["Glen Cook"]);
        assert_eq!(items[1].title, "Untitled");
        assert_eq!(items[1].series_index_hint, Some(4.0));
        assert_eq!(items[1].author_names, vec!["#9 Someone", "Glen Cook"]);

        assert!(lib.list_by_series("Dragonlance").unwrap().is_empty());
    }

    #[test]
    fn test_list_by_series_is_case_sensitive() {
        let lib = library();
        assert!(lib.list_by_series("the black company").unwrap().is_empty());
        assert!(lib.list_by_series("THE BLACK COMPANY").unwrap().is_empty());
    }

    #[test]
    fn test_list_without_series_has_no_hint() {
        let lib = library();
        let items = lib.list_without_series().unwrap();
        let ids: Vec<ItemId> = items.iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![3, 4]);
        assert!(items.iter().all(|i| i.series_index_hint.is_none() && i.series_name.is_none()));
        assert!(items[0].author_names.is_empty());
    }

    #[test]
    fn test_list_all_and_series() {
        let lib = library();
        assert_eq!(lib.list_all().unwrap().len(), 4);
        assert_eq!(lib.list_series().unwrap(), vec!["The Black Company"]);
    }

    #[test]
    fn test_apply_patch() {
        let mut lib = library();
        lib.apply_patch(3, &patch()).unwrap();

        let (title, sort, index, pubdate, author_sort): (String, String, f64, String, String) = lib
            .conn
            .query_row(
                "SELECT title, sort, series_index, pubdate, author_sort FROM books WHERE id = 3",
                [],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?)),
            )
            .unwrap();
        assert_eq!(title, "The Black Company - Vol. 3: Shadows");
        assert_eq!(sort, "Black Company - Vol. 3: Shadows, The");
        assert_eq!(index, 3.0);
        assert_eq!(pubdate, "1987-05-01 00:00:00+00:00");
        assert_eq!(author_sort, "Cook, Glen & Artist, Sam");

        let items = lib.list_by_series("The Black Company").unwrap();
        let book = items.iter().find(|i| i.id == 3).unwrap();
        assert_eq!(book.author_names, vec!["Glen Cook", "Sam Artist"]);
        assert_eq!(book.series_index_hint, Some(3.0));

        let comment: String = lib
            .conn
            .query_row("SELECT text FROM comments WHERE book = 3", [], |r| r.get(0))
            .unwrap();
        assert_eq!(comment, "<p>Synopsis</p>");

        let publisher: String = lib
            .conn
            .query_row(
                "SELECT p.name FROM publishers p JOIN books_publishers_link l ON l.publisher = p.id WHERE l.book = 3",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(publisher, "Tor");

        // Existing series and author rows are reused
        let series_count: i64 = lib.conn.query_row("SELECT COUNT(*) FROM series", [], |r| r.get(0)).unwrap();
        assert_eq!(series_count, 1);
        let author_sort: String = lib
            .conn
            .query_row("SELECT sort FROM authors WHERE name = 'Sam Artist'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(author_sort, "Artist, Sam");
    }

    #[test]
    fn test_apply_patch_twice_is_stable() {
        let mut lib = library();
        lib.apply_patch(1, &patch()).unwrap();
        lib.apply_patch(1, &patch()).unwrap();
        let links: i64 = lib
            .conn
            .query_row("SELECT COUNT(*) FROM books_authors_link WHERE book = 1", [], |r| r.get(0))
            .unwrap();
        assert_eq!(links, 2);
    }

    #[test]
    fn test_apply_patch_unknown_id_changes_nothing() {
        let mut lib = library();
        let err = lib.apply_patch(99, &patch()).unwrap_err();
        assert!(matches!(err, StoreError::NotFound(99)));
        let publishers: i64 = lib
            .conn
            .query_row("SELECT COUNT(*) FROM publishers", [], |r| r.get(0))
            .unwrap();
        assert_eq!(publishers, 0);
    }

    #[test]
    fn test_patch_without_authors_keeps_existing() {
        let mut lib = library();
        let mut p = patch();
        p.authors.clear();
        p.author_sort.clear();
        lib.apply_patch(2, &p).unwrap();
        let items = lib.list_by_series("The Black Company").unwrap();
        let book = items.iter().find(|i| i.id == 2).unwrap();
        assert_eq!(book.author_names, vec!["#9 Someone", "Glen Cook"]);
    }

    #[test]
    fn test_title_sort_function_registered() {
        let lib = library();
        let sorted: String = lib
            .conn
            .query_row("SELECT title_sort('The Wall')", [], |r| r.get(0))
            .unwrap();
        assert_eq!(sorted, "Wall, The");
    }

    #[test]
    fn test_open_missing_database() {
        let dir = tempfile::tempdir().unwrap();
        let err = CalibreLibrary::open(&dir.path().join("missing.db")).err().unwrap();
        assert!(matches!(err, StoreError::Open { .. }));
    }

    #[test]
    fn test_database_path_for_directory() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(
            CalibreLibrary::database_path(dir.path()),
            dir.path().join(CALIBRE_DB_FILE)
        );
    }
}
