//! SQL-level tests for the nadeko virtual table module

use crate::options::ModuleOptions;
use crate::source::{read_all, Origin};
use crate::vtab::{register_module, MODULE_NAME};
use rusqlite::config::DbConfig;
use rusqlite::{params, Connection};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

type Rows = Vec<(i64, String, Vec<u8>)>;

fn write_tar(path: &Path, entries: &[(&str, &str)]) {
    let mut builder = tar::Builder::new(fs::File::create(path).unwrap());
    for (name, data) in entries {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        builder.append_data(&mut header, name, data.as_bytes()).unwrap();
    }
    builder.into_inner().unwrap();
}

fn write_tar_gz(path: &Path, entries: &[(&str, &str)]) {
    let mut builder = tar::Builder::new(Vec::new());
    for (name, data) in entries {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        builder.append_data(&mut header, name, data.as_bytes()).unwrap();
    }
    let bytes = builder.into_inner().unwrap();

    let file = fs::File::create(path).unwrap();
    let mut encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
    encoder.write_all(&bytes).unwrap();
    encoder.finish().unwrap();
}

fn write_zip(path: &Path, entries: &[(&str, &str)]) {
    let mut writer = zip::ZipWriter::new(fs::File::create(path).unwrap());
    for (name, data) in entries {
        writer
            .start_file(*name, zip::write::SimpleFileOptions::default())
            .unwrap();
        writer.write_all(data.as_bytes()).unwrap();
    }
    writer.finish().unwrap();
}

fn connect(db: Option<&Path>) -> Connection {
    let conn = match db {
        Some(path) => Connection::open(path).unwrap(),
        None => Connection::open_in_memory().unwrap(),
    };
    register_module(&conn, ModuleOptions::default().with_chunk_size(3)).unwrap();
    conn
}

fn attach(conn: &Connection, table: &str, origin: &Path) {
    conn.execute_batch(&format!(
        "CREATE VIRTUAL TABLE {} USING {}('{}')",
        table,
        MODULE_NAME,
        origin.display()
    ))
    .unwrap();
}

fn rows(conn: &Connection, table: &str) -> Rows {
    let mut stmt = conn
        .prepare(&format!("SELECT rowid, filename, contents FROM {}", table))
        .unwrap();
    let rows = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))
        .unwrap()
        .collect::<rusqlite::Result<_>>()
        .unwrap();
    rows
}

fn entries(origin: &Path) -> Vec<(String, Vec<u8>)> {
    let mut origin = Origin::open(origin).unwrap();
    read_all(origin.source.as_mut()).unwrap()
}

fn temp_files(dir: &Path) -> Vec<PathBuf> {
    fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().path())
        .filter(|p| p.to_string_lossy().ends_with(".tmp"))
        .collect()
}

#[test]
fn test_scan_two_entry_archive() {
    let dir = TempDir::new().unwrap();
    let origin = dir.path().join("pair.tar");
    write_tar(&origin, &[("a.txt", "hi"), ("b.txt", "bye")]);

    let conn = connect(None);
    attach(&conn, "files", &origin);

    assert_eq!(
        rows(&conn, "files"),
        vec![
            (1, "a.txt".to_string(), b"hi".to_vec()),
            (2, "b.txt".to_string(), b"bye".to_vec()),
        ]
    );
}

#[test]
fn test_limit_materializes_lazily() {
    let dir = TempDir::new().unwrap();
    let origin = dir.path().join("three.tar");
    write_tar(&origin, &[("a", "1"), ("b", "2"), ("c", "3")]);

    let conn = connect(None);
    attach(&conn, "files", &origin);

    let first: String = conn
        .query_row("SELECT filename FROM files LIMIT 1", [], |r| r.get(0))
        .unwrap();
    assert_eq!(first, "a");

    let cached: i64 = conn
        .query_row("SELECT count(*) FROM files_store", [], |r| r.get(0))
        .unwrap();
    assert!(cached < 3, "scan of one row cached {} rows", cached);
}

#[test]
fn test_read_only_scan_leaves_origin_untouched() {
    let dir = TempDir::new().unwrap();
    let origin = dir.path().join("pair.tar");
    write_tar(&origin, &[("a.txt", "hi"), ("b.txt", "bye")]);
    let before = fs::read(&origin).unwrap();

    let conn = connect(None);
    attach(&conn, "files", &origin);
    rows(&conn, "files");
    drop(conn);

    assert_eq!(fs::read(&origin).unwrap(), before);
    assert!(temp_files(dir.path()).is_empty());
}

#[test]
fn test_insert_commits_back_to_tar_gz() {
    let dir = TempDir::new().unwrap();
    let origin = dir.path().join("backup.tar.gz");
    write_tar_gz(&origin, &[("a.txt", "hi"), ("b.txt", "bye")]);

    let conn = connect(None);
    attach(&conn, "files", &origin);
    conn.execute(
        "INSERT INTO files(filename, contents) VALUES (?1, ?2)",
        params!["c.txt", b"sea".to_vec()],
    )
    .unwrap();

    // The insert ran before any scan, yet the archive keeps every entry
    assert_eq!(
        entries(&origin),
        vec![
            ("c.txt".to_string(), b"sea".to_vec()),
            ("a.txt".to_string(), b"hi".to_vec()),
            ("b.txt".to_string(), b"bye".to_vec()),
        ]
    );
    assert!(temp_files(dir.path()).is_empty());

    let names: Vec<String> = rows(&conn, "files").into_iter().map(|r| r.1).collect();
    assert_eq!(names, vec!["c.txt", "a.txt", "b.txt"]);
}

#[test]
fn test_update_and_delete_commit_to_zip() {
    let dir = TempDir::new().unwrap();
    let origin = dir.path().join("bundle.zip");
    write_zip(&origin, &[("keep.txt", "k"), ("drop.txt", "d"), ("edit.txt", "old")]);

    let conn = connect(None);
    attach(&conn, "files", &origin);
    conn.execute_batch(
        "BEGIN;
         DELETE FROM files WHERE filename = 'drop.txt';
         UPDATE files SET contents = X'6E6577' WHERE filename = 'edit.txt';
         COMMIT;",
    )
    .unwrap();

    assert_eq!(
        entries(&origin),
        vec![
            ("keep.txt".to_string(), b"k".to_vec()),
            ("edit.txt".to_string(), b"new".to_vec()),
        ]
    );
}

#[test]
fn test_text_and_null_contents() {
    let dir = TempDir::new().unwrap();
    let origin = dir.path().join("empty.tar");
    write_tar(&origin, &[]);

    let conn = connect(None);
    attach(&conn, "files", &origin);
    conn.execute_batch(
        "INSERT INTO files(filename, contents) VALUES ('text.txt', 'plain');
         INSERT INTO files(filename, contents) VALUES ('nothing', NULL);",
    )
    .unwrap();

    assert_eq!(
        entries(&origin),
        vec![
            ("text.txt".to_string(), b"plain".to_vec()),
            ("nothing".to_string(), Vec::new()),
        ]
    );
}

#[test]
fn test_null_filename_is_constraint_error() {
    let dir = TempDir::new().unwrap();
    let origin = dir.path().join("empty.tar");
    write_tar(&origin, &[]);
    let before = fs::read(&origin).unwrap();

    let conn = connect(None);
    attach(&conn, "files", &origin);
    let err = conn
        .execute("INSERT INTO files(filename, contents) VALUES (NULL, X'00')", [])
        .unwrap_err();

    assert_eq!(err.sqlite_error_code(), Some(rusqlite::ErrorCode::ConstraintViolation));
    assert_eq!(fs::read(&origin).unwrap(), before);
}

#[test]
fn test_explicit_rollback_keeps_origin() {
    let dir = TempDir::new().unwrap();
    let origin = dir.path().join("pair.tar");
    write_tar(&origin, &[("a.txt", "hi"), ("b.txt", "bye")]);
    let before = fs::read(&origin).unwrap();

    let conn = connect(None);
    attach(&conn, "files", &origin);
    conn.execute_batch(
        "BEGIN;
         INSERT INTO files(filename, contents) VALUES ('c.txt', 'sea');
         ROLLBACK;",
    )
    .unwrap();

    assert_eq!(fs::read(&origin).unwrap(), before);
    assert!(temp_files(dir.path()).is_empty());
}

fn count(conn: &Connection) -> i64 {
    conn.query_row("SELECT count(*) FROM files", [], |r| r.get(0))
        .unwrap()
}

fn names(origin: &Path) -> Vec<String> {
    entries(origin).into_iter().map(|(name, _)| name).collect()
}

#[test]
fn test_failed_update_does_not_lose_origin_rows() {
    let dir = TempDir::new().unwrap();
    let origin = dir.path().join("three.tar");
    write_tar(&origin, &[("a.txt", "a"), ("b.txt", "b"), ("c.txt", "c")]);

    let conn = connect(None);
    attach(&conn, "files", &origin);

    // The UPDATE materializes every row, then fails and is rolled back
    let err = conn
        .execute("UPDATE files SET filename = NULL WHERE filename = 'b.txt'", [])
        .unwrap_err();
    assert_eq!(err.sqlite_error_code(), Some(rusqlite::ErrorCode::ConstraintViolation));

    assert_eq!(count(&conn), 3);

    conn.execute("INSERT INTO files(filename, contents) VALUES ('d.txt', 'd')", [])
        .unwrap();
    assert_eq!(names(&origin), vec!["a.txt", "b.txt", "c.txt", "d.txt"]);
}

#[test]
fn test_rolled_back_scan_is_materialized_again() {
    let dir = TempDir::new().unwrap();
    let origin = dir.path().join("three.tar");
    write_tar(&origin, &[("a.txt", "a"), ("b.txt", "b"), ("c.txt", "c")]);

    let conn = connect(None);
    attach(&conn, "files", &origin);

    // A read-only transaction never reaches xBegin, yet its rows roll back
    conn.execute_batch("BEGIN").unwrap();
    assert_eq!(count(&conn), 3);
    conn.execute_batch("ROLLBACK").unwrap();
    assert_eq!(count(&conn), 3);

    conn.execute_batch(
        "BEGIN;
         INSERT INTO files(filename, contents) VALUES ('x.txt', 'x');",
    )
    .unwrap();
    assert_eq!(count(&conn), 4);
    conn.execute_batch("ROLLBACK").unwrap();
    assert_eq!(count(&conn), 3);

    conn.execute("INSERT INTO files(filename, contents) VALUES ('d.txt', 'd')", [])
        .unwrap();
    assert_eq!(names(&origin), vec!["a.txt", "b.txt", "c.txt", "d.txt"]);
}

#[test]
fn test_failed_sync_leaves_origin_and_no_temp() {
    let dir = TempDir::new().unwrap();
    let origin = dir.path().join("cut.tar");
    let big = "x".repeat(64 * 1024);
    write_tar(&origin, &[("ok.txt", "fine"), ("big.bin", big.as_str())]);

    let conn = connect(None);
    attach(&conn, "files", &origin);

    // Cut the archive inside big.bin while the table holds it open
    let file = fs::OpenOptions::new().write(true).open(&origin).unwrap();
    file.set_len(20_000).unwrap();
    drop(file);
    let before = fs::read(&origin).unwrap();

    let err = conn
        .execute("INSERT INTO files(filename, contents) VALUES ('new.txt', 'n')", [])
        .unwrap_err();
    assert_eq!(err.sqlite_error_code(), Some(rusqlite::ErrorCode::DatabaseCorrupt));
    assert!(err.to_string().contains("Corrupt entry"), "{}", err);

    assert_eq!(fs::read(&origin).unwrap(), before);
    assert!(temp_files(dir.path()).is_empty());
}

#[test]
fn test_non_utf8_filename_is_rejected() {
    let dir = TempDir::new().unwrap();
    let origin = dir.path().join("empty.tar");
    write_tar(&origin, &[]);
    let before = fs::read(&origin).unwrap();

    let conn = connect(None);
    attach(&conn, "files", &origin);
    let err = conn
        .execute("INSERT INTO files(filename, contents) VALUES (X'66FF', 'x')", [])
        .unwrap_err();

    assert_eq!(err.sqlite_error_code(), Some(rusqlite::ErrorCode::TypeMismatch));
    assert_eq!(count(&conn), 0);
    assert_eq!(fs::read(&origin).unwrap(), before);
}

#[test]
fn test_directory_origin_is_read_only() {
    let dir = TempDir::new().unwrap();
    let tree = dir.path().join("tree");
    fs::create_dir_all(tree.join("sub")).unwrap();
    fs::write(tree.join("top.txt"), b"top").unwrap();
    fs::write(tree.join("sub/leaf.txt"), b"leaf").unwrap();

    let conn = connect(None);
    attach(&conn, "files", &tree);

    let names: Vec<String> = rows(&conn, "files").into_iter().map(|r| r.1).collect();
    assert_eq!(names, vec!["sub/leaf.txt", "top.txt"]);

    let err = conn
        .execute("DELETE FROM files WHERE filename = 'top.txt'", [])
        .unwrap_err();
    assert!(err.to_string().contains("read-only"), "{}", err);

    assert!(tree.join("top.txt").exists());
    assert!(temp_files(&tree).is_empty());
    assert!(temp_files(dir.path()).is_empty());
}

#[test]
fn test_drop_table_removes_store() {
    let dir = TempDir::new().unwrap();
    let origin = dir.path().join("pair.tar");
    write_tar(&origin, &[("a.txt", "hi")]);

    let conn = connect(None);
    attach(&conn, "files", &origin);
    rows(&conn, "files");
    conn.execute_batch("DROP TABLE files").unwrap();

    let count: i64 = conn
        .query_row(
            "SELECT count(*) FROM sqlite_master \
             WHERE name IN ('files', 'files_store', 'files_progress')",
            [],
            |r| r.get(0),
        )
        .unwrap();
    assert_eq!(count, 0);
    assert!(origin.exists());
}

#[test]
fn test_store_is_protected_shadow_table() {
    let dir = TempDir::new().unwrap();
    let origin = dir.path().join("pair.tar");
    write_tar(&origin, &[("a.txt", "hi")]);

    let conn = connect(None);
    attach(&conn, "files", &origin);
    rows(&conn, "files");

    conn.set_db_config(DbConfig::SQLITE_DBCONFIG_DEFENSIVE, true)
        .unwrap();
    assert!(conn.execute("DELETE FROM files_store", []).is_err());
    assert!(conn.execute("UPDATE files_progress SET known = 0", []).is_err());

    // Writes through the virtual table still reach the store
    conn.execute("DELETE FROM files WHERE rowid = 1", []).unwrap();
    assert!(rows(&conn, "files").is_empty());
}

#[test]
fn test_reopened_database_uses_cached_rows() {
    let dir = TempDir::new().unwrap();
    let origin = dir.path().join("pair.tar");
    let db = dir.path().join("cache.db");
    write_tar(&origin, &[("a.txt", "hi"), ("b.txt", "bye")]);

    {
        let conn = connect(Some(&db));
        attach(&conn, "files", &origin);
        rows(&conn, "files");
    }

    // Replace the origin behind the table's back; the store stays authoritative
    write_tar(&origin, &[("other.txt", "x")]);

    let conn = connect(Some(&db));
    let names: Vec<String> = rows(&conn, "files").into_iter().map(|r| r.1).collect();
    assert_eq!(names, vec!["a.txt", "b.txt"]);
}

#[test]
fn test_two_tables_on_one_connection() {
    let dir = TempDir::new().unwrap();
    let left = dir.path().join("left.tar");
    let right = dir.path().join("right.zip");
    write_tar(&left, &[("l.txt", "left")]);
    write_zip(&right, &[("r.txt", "right")]);

    let conn = connect(None);
    attach(&conn, "lhs", &left);
    attach(&conn, "rhs", &right);

    let joined: Vec<(String, String)> = conn
        .prepare("SELECT lhs.filename, rhs.filename FROM lhs, rhs")
        .unwrap()
        .query_map([], |r| Ok((r.get(0)?, r.get(1)?)))
        .unwrap()
        .collect::<rusqlite::Result<_>>()
        .unwrap();
    assert_eq!(joined, vec![("l.txt".to_string(), "r.txt".to_string())]);
}

#[test]
fn test_attach_argument_errors() {
    let dir = TempDir::new().unwrap();
    let origin = dir.path().join("pair.tar");
    write_tar(&origin, &[("a.txt", "hi")]);
    let conn = connect(None);

    let missing = conn
        .execute_batch("CREATE VIRTUAL TABLE a USING nadeko()")
        .unwrap_err();
    assert!(missing.to_string().contains("Wrong number of arguments"), "{}", missing);

    let unquoted = conn
        .execute_batch(&format!(
            "CREATE VIRTUAL TABLE b USING nadeko({})",
            origin.display()
        ))
        .unwrap_err();
    assert!(unquoted.to_string().contains("quoted"), "{}", unquoted);

    let absent = conn
        .execute_batch(&format!(
            "CREATE VIRTUAL TABLE c USING nadeko('{}')",
            dir.path().join("absent.tar").display()
        ))
        .unwrap_err();
    assert!(absent.to_string().contains("Cannot open origin"), "{}", absent);

    let extra = conn
        .execute_batch("CREATE VIRTUAL TABLE d USING nadeko('x.tar', 'y.tar')")
        .unwrap_err();
    assert!(extra.to_string().contains("got 2"), "{}", extra);
}

#[test]
fn test_register_rejects_invalid_options() {
    let conn = Connection::open_in_memory().unwrap();
    assert!(register_module(&conn, ModuleOptions::default().with_chunk_size(0)).is_err());
}
