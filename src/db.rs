use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

pub const DB_FILE: &str = "campus.sqlite3";
pub const DOCUMENTS_DIR: &str = "documents";

const CATALOGUE_REVISION_KEY: &str = "catalogue.revision";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            uid TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            program_course_id TEXT NOT NULL,
            program_course_name TEXT NOT NULL,
            stream_id TEXT,
            academic_year TEXT,
            created_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_program_course ON students(program_course_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS subjects(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            code TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS paper_options(
            id TEXT PRIMARY KEY,
            program_course_id TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            category_code TEXT NOT NULL,
            class_name TEXT NOT NULL,
            auto_assign INTEGER NOT NULL DEFAULT 0,
            sort_order INTEGER NOT NULL,
            FOREIGN KEY(subject_id) REFERENCES subjects(id),
            UNIQUE(program_course_id, subject_id, category_code, class_name)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_paper_options_program_course ON paper_options(program_course_id, sort_order)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS mandatory_subjects(
            id TEXT PRIMARY KEY,
            program_course_id TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            category_code TEXT NOT NULL,
            class_name TEXT NOT NULL,
            FOREIGN KEY(subject_id) REFERENCES subjects(id),
            UNIQUE(program_course_id, subject_id, category_code, class_name)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS restricted_groupings(
            id TEXT PRIMARY KEY,
            program_course_id TEXT NOT NULL,
            category_code TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(subject_id) REFERENCES subjects(id),
            UNIQUE(program_course_id, category_code, subject_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS restricted_grouping_classes(
            restricted_grouping_id TEXT NOT NULL,
            class_name TEXT NOT NULL,
            PRIMARY KEY(restricted_grouping_id, class_name),
            FOREIGN KEY(restricted_grouping_id) REFERENCES restricted_groupings(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS restricted_grouping_subjects(
            restricted_grouping_id TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            PRIMARY KEY(restricted_grouping_id, subject_id),
            FOREIGN KEY(restricted_grouping_id) REFERENCES restricted_groupings(id),
            FOREIGN KEY(subject_id) REFERENCES subjects(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS selection_metas(
            id TEXT PRIMARY KEY,
            category_code TEXT NOT NULL,
            label TEXT NOT NULL,
            sequence INTEGER NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS selection_meta_classes(
            meta_id TEXT NOT NULL,
            class_name TEXT NOT NULL,
            PRIMARY KEY(meta_id, class_name),
            FOREIGN KEY(meta_id) REFERENCES selection_metas(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS selection_meta_streams(
            meta_id TEXT NOT NULL,
            stream_id TEXT NOT NULL,
            PRIMARY KEY(meta_id, stream_id),
            FOREIGN KEY(meta_id) REFERENCES selection_metas(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS academic_sessions(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            is_current INTEGER NOT NULL DEFAULT 0
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS student_admission_minors(
            student_id TEXT NOT NULL,
            position INTEGER NOT NULL,
            subject_id TEXT NOT NULL,
            PRIMARY KEY(student_id, position),
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(subject_id) REFERENCES subjects(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS student_subject_selections(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            session_id TEXT NOT NULL,
            meta_id TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(session_id) REFERENCES academic_sessions(id),
            FOREIGN KEY(meta_id) REFERENCES selection_metas(id),
            FOREIGN KEY(subject_id) REFERENCES subjects(id),
            UNIQUE(student_id, session_id, meta_id)
        )",
        [],
    )?;
    // Older workspaces recorded selections without the slot they came from.
    ensure_selections_slot(&conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_student_subject_selections_student ON student_subject_selections(student_id, session_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS correction_requests(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL UNIQUE,
            status TEXT NOT NULL,
            remarks TEXT,
            application_number TEXT UNIQUE,
            personal_declared INTEGER NOT NULL DEFAULT 0,
            address_declared INTEGER NOT NULL DEFAULT 0,
            subjects_declared INTEGER NOT NULL DEFAULT 0,
            documents_declared INTEGER NOT NULL DEFAULT 0,
            online_registration_done INTEGER NOT NULL DEFAULT 0,
            gender_correction INTEGER NOT NULL DEFAULT 0,
            nationality_correction INTEGER NOT NULL DEFAULT 0,
            aadhaar_correction INTEGER NOT NULL DEFAULT 0,
            apaar_correction INTEGER NOT NULL DEFAULT 0,
            subjects_correction INTEGER NOT NULL DEFAULT 0,
            personal_json TEXT,
            address_json TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_correction_requests_status ON correction_requests(status)",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS correction_documents(
            id TEXT PRIMARY KEY,
            request_id TEXT NOT NULL,
            document_type TEXT NOT NULL,
            file_name TEXT NOT NULL,
            stored_path TEXT NOT NULL,
            size_bytes INTEGER NOT NULL,
            sha256 TEXT NOT NULL,
            uploaded_at TEXT NOT NULL,
            FOREIGN KEY(request_id) REFERENCES correction_requests(id),
            UNIQUE(request_id, document_type)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS fee_heads(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            default_percentage REAL NOT NULL,
            sequence INTEGER NOT NULL,
            remarks TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS fee_concession_slabs(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            description TEXT,
            default_rate REAL NOT NULL,
            sequence INTEGER NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS fee_receipt_types(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            chk TEXT,
            chk_misc TEXT,
            print_chln TEXT,
            spl_type TEXT,
            print_receipt TEXT,
            chk_online TEXT,
            chk_on_sequence TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS fee_structures(
            id TEXT PRIMARY KEY,
            academic_year TEXT NOT NULL,
            class_name TEXT NOT NULL,
            program_course_id TEXT NOT NULL,
            shift TEXT NOT NULL DEFAULT '',
            receipt_type_id TEXT NOT NULL,
            number_of_instalments INTEGER,
            created_at TEXT NOT NULL,
            FOREIGN KEY(receipt_type_id) REFERENCES fee_receipt_types(id),
            UNIQUE(academic_year, class_name, program_course_id, shift, receipt_type_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS fee_structure_components(
            id TEXT PRIMARY KEY,
            structure_id TEXT NOT NULL,
            fee_head_id TEXT NOT NULL,
            amount REAL NOT NULL,
            is_concession_applicable INTEGER NOT NULL,
            sequence INTEGER NOT NULL,
            FOREIGN KEY(structure_id) REFERENCES fee_structures(id),
            FOREIGN KEY(fee_head_id) REFERENCES fee_heads(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_fee_structure_components_structure ON fee_structure_components(structure_id)",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS student_fee_mappings(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            structure_id TEXT NOT NULL,
            concession_slab_id TEXT,
            mapping_type TEXT NOT NULL,
            instalment_number INTEGER,
            base_amount REAL NOT NULL,
            concession_amount REAL NOT NULL,
            late_fee REAL NOT NULL,
            waived_off_amount REAL NOT NULL,
            total_payable REAL NOT NULL,
            amount_paid REAL NOT NULL DEFAULT 0,
            payment_status TEXT NOT NULL,
            payment_mode TEXT,
            transaction_ref TEXT,
            receipt_number TEXT,
            paid_at TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(structure_id) REFERENCES fee_structures(id),
            FOREIGN KEY(concession_slab_id) REFERENCES fee_concession_slabs(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_student_fee_mappings_student ON student_fee_mappings(student_id)",
        [],
    )?;

    Ok(conn)
}

fn ensure_selections_slot(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "student_subject_selections", "slot")? {
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE student_subject_selections ADD COLUMN slot TEXT",
        [],
    )?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

pub fn settings_get_json(conn: &Connection, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value_json FROM settings WHERE key = ?",
            [key],
            |r| r.get(0),
        )
        .optional()?;
    match raw {
        Some(s) => Ok(Some(serde_json::from_str(&s)?)),
        None => Ok(None),
    }
}

pub fn settings_set_json(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, serde_json::to_string(value)?),
    )?;
    Ok(())
}

pub fn catalogue_revision(conn: &Connection) -> anyhow::Result<i64> {
    Ok(settings_get_json(conn, CATALOGUE_REVISION_KEY)?
        .and_then(|v| v.as_i64())
        .unwrap_or(0))
}

/// Called after every mutation that changes what a selection context would load.
pub fn bump_catalogue_revision(conn: &Connection) -> anyhow::Result<i64> {
    let next = catalogue_revision(conn)? + 1;
    settings_set_json(conn, CATALOGUE_REVISION_KEY, &serde_json::Value::from(next))?;
    Ok(next)
}

pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}
