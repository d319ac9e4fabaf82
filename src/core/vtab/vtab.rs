//! SQLite virtual table module implementation
//!
//! Implements the sqlite3_module interface on top of [`ArchiveTable`] and
//! [`LazyCursor`]. Every callback recovers its Rust state from the C struct
//! SQLite hands back, calls into the safe layer and maps errors onto result
//! codes plus a `sqlite3_malloc`'d message.

use crate::args::{AttachArgs, SHADOW_SUFFIXES};
use crate::cursor::LazyCursor;
use crate::error::{NadekoError, Result};
use crate::options::ModuleOptions;
use crate::table::{ArchiveTable, DECLARED_SCHEMA};
use libsqlite3_sys as ffi;
use rusqlite::Connection;
use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_int, c_void};
use std::{mem, ptr, slice};
use tracing::debug;

/// Name of the module as registered with SQLite
pub const MODULE_NAME: &str = "nadeko";

/// Column index of `filename` in the declared schema
const COLUMN_FILENAME: c_int = 0;
/// Column index of `contents` in the declared schema
const COLUMN_CONTENTS: c_int = 1;

/// Attached table as SQLite sees it
#[repr(C)]
struct ArchiveVTab {
    /// Base sqlite3_vtab structure (MUST be first field)
    base: ffi::sqlite3_vtab,
    table: ArchiveTable,
}

/// Open scan as SQLite sees it
#[repr(C)]
struct ArchiveCursor {
    /// Base sqlite3_vtab_cursor structure (MUST be first field)
    base: ffi::sqlite3_vtab_cursor,
    cursor: LazyCursor,
}

const ZERO_MODULE: ffi::sqlite3_module = unsafe {
    mem::transmute::<[u8; mem::size_of::<ffi::sqlite3_module>()], ffi::sqlite3_module>(
        [0u8; mem::size_of::<ffi::sqlite3_module>()],
    )
};

static NADEKO_MODULE: ffi::sqlite3_module = ffi::sqlite3_module {
    iVersion: 3,
    xCreate: Some(vtab_create),
    xConnect: Some(vtab_connect),
    xBestIndex: Some(vtab_best_index),
    xDisconnect: Some(vtab_disconnect),
    xDestroy: Some(vtab_destroy),
    xOpen: Some(vtab_open),
    xClose: Some(vtab_close),
    xFilter: Some(vtab_filter),
    xNext: Some(vtab_next),
    xEof: Some(vtab_eof),
    xColumn: Some(vtab_column),
    xRowid: Some(vtab_rowid),
    xUpdate: Some(vtab_update),
    xBegin: Some(vtab_begin),
    xSync: Some(vtab_sync),
    xCommit: Some(vtab_commit),
    xRollback: Some(vtab_rollback),
    xShadowName: Some(vtab_shadow_name),
    ..ZERO_MODULE
};

/// Register the module on `conn`
///
/// SQLite takes ownership of `options` and frees them when the module is
/// replaced or the connection closes.
pub fn register_module(conn: &Connection, options: ModuleOptions) -> Result<()> {
    options.validate()?;

    let name = CString::new(MODULE_NAME)
        .map_err(|e| NadekoError::InvalidOptions(format!("Invalid module name: {}", e)))?;
    let aux = Box::into_raw(Box::new(options)) as *mut c_void;

    // On failure SQLite runs the destructor on `aux` itself
    let rc = unsafe {
        ffi::sqlite3_create_module_v2(
            conn.handle(),
            name.as_ptr(),
            &NADEKO_MODULE,
            aux,
            Some(drop_options),
        )
    };

    if rc != ffi::SQLITE_OK {
        return Err(NadekoError::ModuleRegistrationFailed(rc));
    }

    debug!("Registered virtual table module '{}'", MODULE_NAME);
    Ok(())
}

unsafe extern "C" fn drop_options(aux: *mut c_void) {
    if !aux.is_null() {
        drop(Box::from_raw(aux as *mut ModuleOptions));
    }
}

// Error plumbing

/// Copy `message` into memory SQLite can free with sqlite3_free
unsafe fn sqlite_message(message: &str) -> *mut c_char {
    let bytes = message.as_bytes();
    let out = ffi::sqlite3_malloc64(bytes.len() as u64 + 1) as *mut u8;
    if out.is_null() {
        return ptr::null_mut();
    }

    ptr::copy_nonoverlapping(bytes.as_ptr(), out, bytes.len());
    *out.add(bytes.len()) = 0;
    out as *mut c_char
}

/// Record `err` on the table and return its result code
unsafe fn table_error(vtab: *mut ffi::sqlite3_vtab, err: &NadekoError) -> c_int {
    if !(*vtab).zErrMsg.is_null() {
        ffi::sqlite3_free((*vtab).zErrMsg as *mut c_void);
    }
    (*vtab).zErrMsg = sqlite_message(&err.to_string());
    err.sqlite_code()
}

unsafe fn cursor_error(cursor: *mut ffi::sqlite3_vtab_cursor, err: &NadekoError) -> c_int {
    table_error((*cursor).pVtab, err)
}

// Table lifecycle

#[allow(clippy::too_many_arguments)]
unsafe fn attach(
    db: *mut ffi::sqlite3,
    aux: *mut c_void,
    argc: c_int,
    argv: *const *const c_char,
    pp_vtab: *mut *mut ffi::sqlite3_vtab,
    pz_err: *mut *mut c_char,
    create: bool,
) -> c_int {
    let options = match (aux as *const ModuleOptions).as_ref() {
        Some(options) => options.clone(),
        None => ModuleOptions::default(),
    };

    let argv: Vec<String> = (0..usize::try_from(argc).unwrap_or(0))
        .map(|i| CStr::from_ptr(*argv.add(i)).to_string_lossy().into_owned())
        .collect();

    let result = AttachArgs::parse(&argv).and_then(|args| {
        declare_schema(db)?;
        let conn = Connection::from_handle(db)?;
        ArchiveTable::attach(conn, args, options, create)
    });

    match result {
        Ok(table) => {
            let vtab = Box::new(ArchiveVTab {
                base: mem::zeroed(),
                table,
            });
            *pp_vtab = Box::into_raw(vtab) as *mut ffi::sqlite3_vtab;
            ffi::SQLITE_OK
        }
        Err(e) => {
            if !pz_err.is_null() {
                *pz_err = sqlite_message(&e.to_string());
            }
            e.sqlite_code()
        }
    }
}

unsafe fn declare_schema(db: *mut ffi::sqlite3) -> Result<()> {
    let schema = CString::new(DECLARED_SCHEMA)
        .map_err(|e| NadekoError::InvalidOptions(format!("Invalid schema: {}", e)))?;

    let rc = ffi::sqlite3_declare_vtab(db, schema.as_ptr());
    if rc != ffi::SQLITE_OK {
        return Err(rusqlite::Error::SqliteFailure(ffi::Error::new(rc), None).into());
    }
    Ok(())
}

unsafe extern "C" fn vtab_create(
    db: *mut ffi::sqlite3,
    aux: *mut c_void,
    argc: c_int,
    argv: *const *const c_char,
    pp_vtab: *mut *mut ffi::sqlite3_vtab,
    pz_err: *mut *mut c_char,
) -> c_int {
    attach(db, aux, argc, argv, pp_vtab, pz_err, true)
}

unsafe extern "C" fn vtab_connect(
    db: *mut ffi::sqlite3,
    aux: *mut c_void,
    argc: c_int,
    argv: *const *const c_char,
    pp_vtab: *mut *mut ffi::sqlite3_vtab,
    pz_err: *mut *mut c_char,
) -> c_int {
    attach(db, aux, argc, argv, pp_vtab, pz_err, false)
}

unsafe extern "C" fn vtab_best_index(
    vtab: *mut ffi::sqlite3_vtab,
    info: *mut ffi::sqlite3_index_info,
) -> c_int {
    let archive = &*(vtab as *const ArchiveVTab);

    // Always a full scan in rowid order; constraints are left to SQLite
    (*info).idxNum = 0;
    (*info).estimatedCost = archive.table.estimated_cost();
    (*info).estimatedRows = archive.table.materializer().known().max(1);
    ffi::SQLITE_OK
}

unsafe extern "C" fn vtab_disconnect(vtab: *mut ffi::sqlite3_vtab) -> c_int {
    release(vtab);
    ffi::SQLITE_OK
}

unsafe extern "C" fn vtab_destroy(vtab: *mut ffi::sqlite3_vtab) -> c_int {
    let result = (*(vtab as *const ArchiveVTab)).table.destroy();
    if let Err(e) = result {
        return table_error(vtab, &e);
    }

    release(vtab);
    ffi::SQLITE_OK
}

/// Free the table and anything it still owns
unsafe fn release(vtab: *mut ffi::sqlite3_vtab) {
    let archive = Box::from_raw(vtab as *mut ArchiveVTab);
    if !archive.base.zErrMsg.is_null() {
        ffi::sqlite3_free(archive.base.zErrMsg as *mut c_void);
    }
    drop(archive);
}

// Cursors

unsafe extern "C" fn vtab_open(
    _vtab: *mut ffi::sqlite3_vtab,
    pp_cursor: *mut *mut ffi::sqlite3_vtab_cursor,
) -> c_int {
    let cursor = Box::new(ArchiveCursor {
        base: mem::zeroed(),
        cursor: LazyCursor::new(),
    });
    *pp_cursor = Box::into_raw(cursor) as *mut ffi::sqlite3_vtab_cursor;
    ffi::SQLITE_OK
}

unsafe extern "C" fn vtab_close(cursor: *mut ffi::sqlite3_vtab_cursor) -> c_int {
    drop(Box::from_raw(cursor as *mut ArchiveCursor));
    ffi::SQLITE_OK
}

/// Table a cursor was opened on
unsafe fn cursor_table<'a>(cursor: *mut ffi::sqlite3_vtab_cursor) -> &'a ArchiveTable {
    &(*((*cursor).pVtab as *const ArchiveVTab)).table
}

unsafe extern "C" fn vtab_filter(
    cursor: *mut ffi::sqlite3_vtab_cursor,
    _idx_num: c_int,
    _idx_str: *const c_char,
    _argc: c_int,
    _argv: *mut *mut ffi::sqlite3_value,
) -> c_int {
    let table = cursor_table(cursor);
    let scan = &mut (*(cursor as *mut ArchiveCursor)).cursor;

    match table.filter(scan) {
        Ok(()) => ffi::SQLITE_OK,
        Err(e) => cursor_error(cursor, &e),
    }
}

unsafe extern "C" fn vtab_next(cursor: *mut ffi::sqlite3_vtab_cursor) -> c_int {
    let table = cursor_table(cursor);
    let scan = &mut (*(cursor as *mut ArchiveCursor)).cursor;

    match table.advance(scan) {
        Ok(()) => ffi::SQLITE_OK,
        Err(e) => cursor_error(cursor, &e),
    }
}

unsafe extern "C" fn vtab_eof(cursor: *mut ffi::sqlite3_vtab_cursor) -> c_int {
    let scan = &(*(cursor as *const ArchiveCursor)).cursor;
    c_int::from(scan.eof())
}

unsafe extern "C" fn vtab_column(
    cursor: *mut ffi::sqlite3_vtab_cursor,
    ctx: *mut ffi::sqlite3_context,
    column: c_int,
) -> c_int {
    let table = cursor_table(cursor);
    let scan = &(*(cursor as *const ArchiveCursor)).cursor;

    match column {
        COLUMN_FILENAME => match scan.filename() {
            Some(name) => ffi::sqlite3_result_text64(
                ctx,
                name.as_ptr() as *const c_char,
                name.len() as u64,
                ffi::SQLITE_TRANSIENT(),
                ffi::SQLITE_UTF8 as u8,
            ),
            None => ffi::sqlite3_result_null(ctx),
        },
        COLUMN_CONTENTS => match scan.contents(table.store()) {
            Ok(Some(data)) if data.is_empty() => ffi::sqlite3_result_zeroblob(ctx, 0),
            Ok(Some(data)) => ffi::sqlite3_result_blob64(
                ctx,
                data.as_ptr() as *const c_void,
                data.len() as u64,
                ffi::SQLITE_TRANSIENT(),
            ),
            Ok(None) => ffi::sqlite3_result_null(ctx),
            Err(e) => return cursor_error(cursor, &e),
        },
        _ => ffi::sqlite3_result_null(ctx),
    }

    ffi::SQLITE_OK
}

unsafe extern "C" fn vtab_rowid(
    cursor: *mut ffi::sqlite3_vtab_cursor,
    p_rowid: *mut ffi::sqlite3_int64,
) -> c_int {
    let scan = &(*(cursor as *const ArchiveCursor)).cursor;
    *p_rowid = scan.rowid().unwrap_or(0);
    ffi::SQLITE_OK
}

// Mutations

/// Text of a value, `None` for SQL NULL
///
/// Blobs are passed through unconverted by sqlite3_value_text, so the bytes
/// are checked before they can become an archive path.
unsafe fn value_text<'a>(value: *mut ffi::sqlite3_value) -> Result<Option<&'a str>> {
    if ffi::sqlite3_value_type(value) == ffi::SQLITE_NULL {
        return Ok(None);
    }

    let text = ffi::sqlite3_value_text(value);
    let len = ffi::sqlite3_value_bytes(value);
    if text.is_null() || len <= 0 {
        return Ok(Some(""));
    }

    let bytes = slice::from_raw_parts(text, len as usize);
    let text = std::str::from_utf8(bytes).map_err(NadekoError::InvalidFilename)?;
    Ok(Some(text))
}

/// Bytes of a value, `None` for SQL NULL
unsafe fn value_bytes<'a>(value: *mut ffi::sqlite3_value) -> Option<&'a [u8]> {
    if ffi::sqlite3_value_type(value) == ffi::SQLITE_NULL {
        return None;
    }

    let blob = ffi::sqlite3_value_blob(value) as *const u8;
    let len = ffi::sqlite3_value_bytes(value);
    if blob.is_null() || len <= 0 {
        return Some(&[]);
    }

    Some(slice::from_raw_parts(blob, len as usize))
}

unsafe fn value_rowid(value: *mut ffi::sqlite3_value) -> Option<i64> {
    if ffi::sqlite3_value_type(value) == ffi::SQLITE_NULL {
        None
    } else {
        Some(ffi::sqlite3_value_int64(value))
    }
}

unsafe extern "C" fn vtab_update(
    vtab: *mut ffi::sqlite3_vtab,
    argc: c_int,
    argv: *mut *mut ffi::sqlite3_value,
    p_rowid: *mut ffi::sqlite3_int64,
) -> c_int {
    let table = &(*(vtab as *const ArchiveVTab)).table;
    let args = slice::from_raw_parts(argv, usize::try_from(argc).unwrap_or(0));

    let result = match args {
        [old] => match value_rowid(*old) {
            Some(rowid) => table.delete(rowid),
            None => Ok(()),
        },
        [old, new, filename, contents, ..] => value_text(*filename).and_then(|filename| {
            let contents = value_bytes(*contents);

            match value_rowid(*old) {
                None => table
                    .insert(value_rowid(*new), filename, contents)
                    .map(|rowid| *p_rowid = rowid),
                Some(old_rowid) => {
                    let new_rowid = value_rowid(*new).unwrap_or(old_rowid);
                    table.update(old_rowid, new_rowid, filename, contents)
                }
            }
        }),
        _ => Err(NadekoError::ArgumentCount(args.len())),
    };

    match result {
        Ok(()) => ffi::SQLITE_OK,
        Err(e) => table_error(vtab, &e),
    }
}

// Transactions

/// Run a write-back verb against the table behind `vtab`
unsafe fn transaction_verb(
    vtab: *mut ffi::sqlite3_vtab,
    verb: fn(&mut ArchiveTable) -> Result<()>,
) -> c_int {
    let table = &mut (*(vtab as *mut ArchiveVTab)).table;
    match verb(table) {
        Ok(()) => ffi::SQLITE_OK,
        Err(e) => table_error(vtab, &e),
    }
}

unsafe extern "C" fn vtab_begin(vtab: *mut ffi::sqlite3_vtab) -> c_int {
    transaction_verb(vtab, ArchiveTable::begin)
}

unsafe extern "C" fn vtab_sync(vtab: *mut ffi::sqlite3_vtab) -> c_int {
    transaction_verb(vtab, ArchiveTable::sync)
}

unsafe extern "C" fn vtab_commit(vtab: *mut ffi::sqlite3_vtab) -> c_int {
    transaction_verb(vtab, ArchiveTable::commit)
}

unsafe extern "C" fn vtab_rollback(vtab: *mut ffi::sqlite3_vtab) -> c_int {
    transaction_verb(vtab, ArchiveTable::rollback)
}

unsafe extern "C" fn vtab_shadow_name(name: *const c_char) -> c_int {
    if name.is_null() {
        return 0;
    }
    let suffix = CStr::from_ptr(name).to_bytes();
    c_int::from(SHADOW_SUFFIXES.iter().any(|s| s.as_bytes() == suffix))
}
