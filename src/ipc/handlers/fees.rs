use std::collections::BTreeMap;

use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Deserializer};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::db;
use crate::fees::payable::{self, Component};
use crate::fees::{
    check_amount, check_percentage, FeesError, MappingType, PaymentMode, PaymentStatus,
};
use crate::ipc::helpers::{
    exists, is_constraint_violation, parse_params, required_text, with_conn, ConnHandler,
    HandlerErr,
};
use crate::ipc::types::{AppState, Request};

/// Distinguishes an absent key from an explicit `null`.
fn double_option<'de, D, T>(d: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(d).map(Some)
}

fn duplicate_or_insert(e: rusqlite::Error, table: &str, what: String) -> HandlerErr {
    if is_constraint_violation(&e) {
        return FeesError::Duplicate(what).into();
    }
    HandlerErr::insert(e, table)
}

fn duplicate_or_update(e: rusqlite::Error, table: &str, what: String) -> HandlerErr {
    if is_constraint_violation(&e) {
        return FeesError::Duplicate(what).into();
    }
    HandlerErr::update(e, table)
}

fn require(conn: &Connection, table: &str, id: &str, what: &'static str) -> Result<(), HandlerErr> {
    if exists(conn, table, id)? {
        Ok(())
    } else {
        Err(FeesError::NotFound(what).into())
    }
}

fn count_refs(conn: &Connection, sql: &str, id: &str) -> Result<i64, HandlerErr> {
    conn.query_row(sql, [id], |r| r.get(0)).map_err(HandlerErr::query)
}

fn delete_row(conn: &Connection, table: &str, id: &str, what: &'static str) -> Result<Value, HandlerErr> {
    let sql = format!("DELETE FROM {table} WHERE id = ?");
    let n = conn
        .execute(&sql, [id])
        .map_err(|e| HandlerErr::new("db_delete_failed", e.to_string()))?;
    if n == 0 {
        return Err(FeesError::NotFound(what).into());
    }
    Ok(json!({ "ok": true }))
}

// Fee heads

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct HeadCreateParams {
    name: String,
    default_percentage: f64,
    #[serde(default)]
    sequence: Option<i64>,
    #[serde(default)]
    remarks: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct HeadUpdateParams {
    fee_head_id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    default_percentage: Option<f64>,
    #[serde(default)]
    sequence: Option<i64>,
    #[serde(default, deserialize_with = "double_option")]
    remarks: Option<Option<String>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct HeadIdParams {
    fee_head_id: String,
}

fn next_sequence(conn: &Connection, table: &str) -> Result<i64, HandlerErr> {
    let sql = format!("SELECT COALESCE(MAX(sequence), 0) + 1 FROM {table}");
    conn.query_row(&sql, [], |r| r.get(0)).map_err(HandlerErr::query)
}

fn head_json(conn: &Connection, id: &str) -> Result<Value, HandlerErr> {
    conn.query_row(
        "SELECT id, name, default_percentage, sequence, remarks FROM fee_heads WHERE id = ?",
        [id],
        |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "defaultPercentage": r.get::<_, f64>(2)?,
                "sequence": r.get::<_, i64>(3)?,
                "remarks": r.get::<_, Option<String>>(4)?,
            }))
        },
    )
    .optional()
    .map_err(HandlerErr::query)?
    .ok_or_else(|| FeesError::NotFound("fee head").into())
}

fn heads_create(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let p: HeadCreateParams = parse_params(params)?;
    let name = required_text(&p.name, "name")?;
    let pct = check_percentage("defaultPercentage", p.default_percentage)?;
    let sequence = match p.sequence {
        Some(s) => s,
        None => next_sequence(conn, "fee_heads")?,
    };
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO fee_heads(id, name, default_percentage, sequence, remarks) VALUES(?, ?, ?, ?, ?)",
        (&id, &name, pct, sequence, &p.remarks),
    )
    .map_err(|e| duplicate_or_insert(e, "fee_heads", format!("fee head {name}")))?;
    Ok(json!({ "feeHead": head_json(conn, &id)? }))
}

fn heads_list(conn: &Connection, _params: &Value) -> Result<Value, HandlerErr> {
    let mut stmt = conn
        .prepare("SELECT id FROM fee_heads ORDER BY sequence, name")
        .map_err(HandlerErr::query)?;
    let ids = stmt
        .query_map([], |r| r.get::<_, String>(0))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;
    let heads = ids
        .iter()
        .map(|id| head_json(conn, id))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "feeHeads": heads }))
}

fn heads_update(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let p: HeadUpdateParams = parse_params(params)?;
    require(conn, "fee_heads", &p.fee_head_id, "fee head")?;
    let name = p.name.as_deref().map(|n| required_text(n, "name")).transpose()?;
    let pct = p
        .default_percentage
        .map(|v| check_percentage("defaultPercentage", v))
        .transpose()?;

    let tx = conn.unchecked_transaction().map_err(HandlerErr::tx)?;
    if let Some(name) = &name {
        tx.execute("UPDATE fee_heads SET name = ? WHERE id = ?", (name, &p.fee_head_id))
            .map_err(|e| duplicate_or_update(e, "fee_heads", format!("fee head {name}")))?;
    }
    if let Some(pct) = pct {
        tx.execute(
            "UPDATE fee_heads SET default_percentage = ? WHERE id = ?",
            (pct, &p.fee_head_id),
        )
        .map_err(|e| HandlerErr::update(e, "fee_heads"))?;
    }
    if let Some(seq) = p.sequence {
        tx.execute("UPDATE fee_heads SET sequence = ? WHERE id = ?", (seq, &p.fee_head_id))
            .map_err(|e| HandlerErr::update(e, "fee_heads"))?;
    }
    if let Some(remarks) = &p.remarks {
        tx.execute("UPDATE fee_heads SET remarks = ? WHERE id = ?", (remarks, &p.fee_head_id))
            .map_err(|e| HandlerErr::update(e, "fee_heads"))?;
    }
    tx.commit().map_err(HandlerErr::tx)?;
    Ok(json!({ "feeHead": head_json(conn, &p.fee_head_id)? }))
}

fn heads_delete(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let p: HeadIdParams = parse_params(params)?;
    require(conn, "fee_heads", &p.fee_head_id, "fee head")?;
    let refs = count_refs(
        conn,
        "SELECT COUNT(*) FROM fee_structure_components WHERE fee_head_id = ?",
        &p.fee_head_id,
    )?;
    if refs > 0 {
        return Err(FeesError::InUse {
            what: "fee head",
            by: "fee structure components",
            count: refs,
        }
        .into());
    }
    delete_row(conn, "fee_heads", &p.fee_head_id, "fee head")
}

// Concession slabs

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct SlabCreateParams {
    name: String,
    #[serde(default)]
    description: Option<String>,
    default_rate: f64,
    #[serde(default)]
    sequence: Option<i64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct SlabUpdateParams {
    concession_slab_id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    description: Option<Option<String>>,
    #[serde(default)]
    default_rate: Option<f64>,
    #[serde(default)]
    sequence: Option<i64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct SlabIdParams {
    concession_slab_id: String,
}

fn slab_json(conn: &Connection, id: &str) -> Result<Value, HandlerErr> {
    conn.query_row(
        "SELECT id, name, description, default_rate, sequence FROM fee_concession_slabs WHERE id = ?",
        [id],
        |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "description": r.get::<_, Option<String>>(2)?,
                "defaultRate": r.get::<_, f64>(3)?,
                "sequence": r.get::<_, i64>(4)?,
            }))
        },
    )
    .optional()
    .map_err(HandlerErr::query)?
    .ok_or_else(|| FeesError::NotFound("concession slab").into())
}

fn slabs_create(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let p: SlabCreateParams = parse_params(params)?;
    let name = required_text(&p.name, "name")?;
    let rate = check_percentage("defaultRate", p.default_rate)?;
    let sequence = match p.sequence {
        Some(s) => s,
        None => next_sequence(conn, "fee_concession_slabs")?,
    };
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO fee_concession_slabs(id, name, description, default_rate, sequence) VALUES(?, ?, ?, ?, ?)",
        (&id, &name, &p.description, rate, sequence),
    )
    .map_err(|e| duplicate_or_insert(e, "fee_concession_slabs", format!("concession slab {name}")))?;
    Ok(json!({ "concessionSlab": slab_json(conn, &id)? }))
}

fn slabs_list(conn: &Connection, _params: &Value) -> Result<Value, HandlerErr> {
    let mut stmt = conn
        .prepare("SELECT id FROM fee_concession_slabs ORDER BY sequence, name")
        .map_err(HandlerErr::query)?;
    let ids = stmt
        .query_map([], |r| r.get::<_, String>(0))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;
    let slabs = ids
        .iter()
        .map(|id| slab_json(conn, id))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "concessionSlabs": slabs }))
}

fn slabs_update(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let p: SlabUpdateParams = parse_params(params)?;
    require(conn, "fee_concession_slabs", &p.concession_slab_id, "concession slab")?;
    let tx = conn.unchecked_transaction().map_err(HandlerErr::tx)?;
    if let Some(name) = &p.name {
        let name = required_text(name, "name")?;
        tx.execute(
            "UPDATE fee_concession_slabs SET name = ? WHERE id = ?",
            (&name, &p.concession_slab_id),
        )
        .map_err(|e| duplicate_or_update(e, "fee_concession_slabs", format!("concession slab {name}")))?;
    }
    if let Some(description) = &p.description {
        tx.execute(
            "UPDATE fee_concession_slabs SET description = ? WHERE id = ?",
            (description, &p.concession_slab_id),
        )
        .map_err(|e| HandlerErr::update(e, "fee_concession_slabs"))?;
    }
    if let Some(seq) = p.sequence {
        tx.execute(
            "UPDATE fee_concession_slabs SET sequence = ? WHERE id = ?",
            (seq, &p.concession_slab_id),
        )
        .map_err(|e| HandlerErr::update(e, "fee_concession_slabs"))?;
    }
    let mut recomputed = 0usize;
    if let Some(rate) = p.default_rate {
        let rate = check_percentage("defaultRate", rate)?;
        tx.execute(
            "UPDATE fee_concession_slabs SET default_rate = ? WHERE id = ?",
            (rate, &p.concession_slab_id),
        )
        .map_err(|e| HandlerErr::update(e, "fee_concession_slabs"))?;
        let mut stmt = tx
            .prepare("SELECT id FROM student_fee_mappings WHERE concession_slab_id = ?")
            .map_err(HandlerErr::query)?;
        let mapping_ids = stmt
            .query_map([&p.concession_slab_id], |r| r.get::<_, String>(0))
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(HandlerErr::query)?;
        drop(stmt);
        for id in &mapping_ids {
            recompute_mapping(&tx, id)?;
        }
        recomputed = mapping_ids.len();
    }
    tx.commit().map_err(HandlerErr::tx)?;
    if recomputed > 0 {
        tracing::info!(slab = %p.concession_slab_id, mappings = recomputed, "slab rate changed, payables recomputed");
    }
    Ok(json!({
        "concessionSlab": slab_json(conn, &p.concession_slab_id)?,
        "recomputedMappings": recomputed,
    }))
}

fn slabs_delete(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let p: SlabIdParams = parse_params(params)?;
    require(conn, "fee_concession_slabs", &p.concession_slab_id, "concession slab")?;
    let refs = count_refs(
        conn,
        "SELECT COUNT(*) FROM student_fee_mappings WHERE concession_slab_id = ?",
        &p.concession_slab_id,
    )?;
    if refs > 0 {
        return Err(FeesError::InUse {
            what: "concession slab",
            by: "student fee mappings",
            count: refs,
        }
        .into());
    }
    delete_row(conn, "fee_concession_slabs", &p.concession_slab_id, "concession slab")
}

// Receipt types

/// Shared by create and update: create needs `name` and no id, update needs
/// the id and touches only the keys it is given.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct ReceiptParams {
    #[serde(default)]
    receipt_type_id: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    chk: Option<String>,
    #[serde(default)]
    chk_misc: Option<String>,
    #[serde(default)]
    print_chln: Option<String>,
    #[serde(default)]
    spl_type: Option<String>,
    #[serde(default)]
    print_receipt: Option<String>,
    #[serde(default)]
    chk_online: Option<String>,
    #[serde(default)]
    chk_on_sequence: Option<String>,
}

impl ReceiptParams {
    fn flag_columns(&self) -> [(&'static str, Option<&String>); 7] {
        [
            ("chk", self.chk.as_ref()),
            ("chk_misc", self.chk_misc.as_ref()),
            ("print_chln", self.print_chln.as_ref()),
            ("spl_type", self.spl_type.as_ref()),
            ("print_receipt", self.print_receipt.as_ref()),
            ("chk_online", self.chk_online.as_ref()),
            ("chk_on_sequence", self.chk_on_sequence.as_ref()),
        ]
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct ReceiptIdParams {
    receipt_type_id: String,
}

fn receipt_json(conn: &Connection, id: &str) -> Result<Value, HandlerErr> {
    conn.query_row(
        "SELECT id, name, chk, chk_misc, print_chln, spl_type, print_receipt, chk_online, chk_on_sequence
         FROM fee_receipt_types WHERE id = ?",
        [id],
        |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "chk": r.get::<_, Option<String>>(2)?,
                "chkMisc": r.get::<_, Option<String>>(3)?,
                "printChln": r.get::<_, Option<String>>(4)?,
                "splType": r.get::<_, Option<String>>(5)?,
                "printReceipt": r.get::<_, Option<String>>(6)?,
                "chkOnline": r.get::<_, Option<String>>(7)?,
                "chkOnSequence": r.get::<_, Option<String>>(8)?,
            }))
        },
    )
    .optional()
    .map_err(HandlerErr::query)?
    .ok_or_else(|| FeesError::NotFound("receipt type").into())
}

fn receipts_create(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let f: ReceiptParams = parse_params(params)?;
    if f.receipt_type_id.is_some() {
        return Err(HandlerErr::bad_params("receiptTypeId is assigned on create"));
    }
    let name = required_text(f.name.as_deref().unwrap_or(""), "name")?;
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO fee_receipt_types(id, name, chk, chk_misc, print_chln, spl_type, print_receipt, chk_online, chk_on_sequence)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &id,
            &name,
            &f.chk,
            &f.chk_misc,
            &f.print_chln,
            &f.spl_type,
            &f.print_receipt,
            &f.chk_online,
            &f.chk_on_sequence,
        ),
    )
    .map_err(|e| duplicate_or_insert(e, "fee_receipt_types", format!("receipt type {name}")))?;
    Ok(json!({ "receiptType": receipt_json(conn, &id)? }))
}

fn receipts_list(conn: &Connection, _params: &Value) -> Result<Value, HandlerErr> {
    let mut stmt = conn
        .prepare("SELECT id FROM fee_receipt_types ORDER BY name")
        .map_err(HandlerErr::query)?;
    let ids = stmt
        .query_map([], |r| r.get::<_, String>(0))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;
    let types = ids
        .iter()
        .map(|id| receipt_json(conn, id))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "receiptTypes": types }))
}

fn receipts_update(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let p: ReceiptParams = parse_params(params)?;
    let Some(receipt_type_id) = p.receipt_type_id.as_deref() else {
        return Err(HandlerErr::bad_params("receiptTypeId is required"));
    };
    require(conn, "fee_receipt_types", receipt_type_id, "receipt type")?;
    let name = p.name.as_deref().map(|n| required_text(n, "name")).transpose()?;

    let tx = conn.unchecked_transaction().map_err(HandlerErr::tx)?;
    if let Some(name) = &name {
        tx.execute(
            "UPDATE fee_receipt_types SET name = ? WHERE id = ?",
            (name, receipt_type_id),
        )
        .map_err(|e| duplicate_or_update(e, "fee_receipt_types", format!("receipt type {name}")))?;
    }
    for (column, value) in p.flag_columns() {
        let Some(value) = value else { continue };
        let sql = format!("UPDATE fee_receipt_types SET {column} = ? WHERE id = ?");
        tx.execute(&sql, (value, receipt_type_id))
            .map_err(|e| HandlerErr::update(e, "fee_receipt_types"))?;
    }
    tx.commit().map_err(HandlerErr::tx)?;
    Ok(json!({ "receiptType": receipt_json(conn, receipt_type_id)? }))
}

fn receipts_delete(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let p: ReceiptIdParams = parse_params(params)?;
    require(conn, "fee_receipt_types", &p.receipt_type_id, "receipt type")?;
    let refs = count_refs(
        conn,
        "SELECT COUNT(*) FROM fee_structures WHERE receipt_type_id = ?",
        &p.receipt_type_id,
    )?;
    if refs > 0 {
        return Err(FeesError::InUse {
            what: "receipt type",
            by: "fee structures",
            count: refs,
        }
        .into());
    }
    delete_row(conn, "fee_receipt_types", &p.receipt_type_id, "receipt type")
}

// Fee structures

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct ComponentParams {
    fee_head_id: String,
    amount: f64,
    #[serde(default)]
    is_concession_applicable: bool,
    #[serde(default)]
    sequence: Option<i64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct StructureCreateParams {
    academic_year: String,
    class_name: String,
    program_course_id: String,
    #[serde(default)]
    shift: Option<String>,
    receipt_type_id: String,
    #[serde(default)]
    number_of_instalments: Option<i64>,
    #[serde(default)]
    components: Vec<ComponentParams>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct StructureListParams {
    #[serde(default)]
    academic_year: Option<String>,
    #[serde(default)]
    program_course_id: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct StructureIdParams {
    structure_id: String,
}

fn structure_components(conn: &Connection, structure_id: &str) -> Result<Vec<Value>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT c.id, c.fee_head_id, h.name, c.amount, c.is_concession_applicable, c.sequence
             FROM fee_structure_components c
             JOIN fee_heads h ON h.id = c.fee_head_id
             WHERE c.structure_id = ?
             ORDER BY c.sequence, h.name",
        )
        .map_err(HandlerErr::query)?;
    let rows = stmt
        .query_map([structure_id], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "feeHeadId": r.get::<_, String>(1)?,
                "feeHeadName": r.get::<_, String>(2)?,
                "amount": r.get::<_, f64>(3)?,
                "isConcessionApplicable": r.get::<_, i64>(4)? != 0,
                "sequence": r.get::<_, i64>(5)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;
    Ok(rows)
}

fn payable_components(conn: &Connection, structure_id: &str) -> Result<Vec<Component>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT amount, is_concession_applicable FROM fee_structure_components WHERE structure_id = ?",
        )
        .map_err(HandlerErr::query)?;
    let rows = stmt
        .query_map([structure_id], |r| {
            Ok(Component {
                amount: r.get(0)?,
                concession_applicable: r.get::<_, i64>(1)? != 0,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;
    Ok(rows)
}

fn structure_json(conn: &Connection, id: &str) -> Result<Value, HandlerErr> {
    let mut structure = conn
        .query_row(
            "SELECT s.id, s.academic_year, s.class_name, s.program_course_id, s.shift,
                    s.receipt_type_id, r.name, s.number_of_instalments, s.created_at
             FROM fee_structures s
             JOIN fee_receipt_types r ON r.id = s.receipt_type_id
             WHERE s.id = ?",
            [id],
            |r| {
                let shift: String = r.get(4)?;
                Ok(json!({
                    "id": r.get::<_, String>(0)?,
                    "academicYear": r.get::<_, String>(1)?,
                    "className": r.get::<_, String>(2)?,
                    "programCourseId": r.get::<_, String>(3)?,
                    "shift": if shift.is_empty() { Value::Null } else { Value::String(shift) },
                    "receiptTypeId": r.get::<_, String>(5)?,
                    "receiptTypeName": r.get::<_, String>(6)?,
                    "numberOfInstalments": r.get::<_, Option<i64>>(7)?,
                    "createdAt": r.get::<_, String>(8)?,
                }))
            },
        )
        .optional()
        .map_err(HandlerErr::query)?
        .ok_or(FeesError::NotFound("fee structure"))?;
    let components = structure_components(conn, id)?;
    let total: f64 = components
        .iter()
        .filter_map(|c| c["amount"].as_f64())
        .sum();
    structure["components"] = Value::Array(components);
    structure["totalAmount"] = json!(total);
    Ok(structure)
}

fn structures_create(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let p: StructureCreateParams = parse_params(params)?;
    let academic_year = required_text(&p.academic_year, "academicYear")?;
    let class_name = required_text(&p.class_name, "className")?;
    let program_course_id = required_text(&p.program_course_id, "programCourseId")?;
    let shift = p.shift.as_deref().map(str::trim).unwrap_or("").to_string();
    require(conn, "fee_receipt_types", &p.receipt_type_id, "receipt type")?;
    if let Some(n) = p.number_of_instalments {
        if n < 1 {
            return Err(FeesError::Invalid("numberOfInstalments must be at least 1".into()).into());
        }
    }
    for c in &p.components {
        check_amount("amount", c.amount)?;
        require(conn, "fee_heads", &c.fee_head_id, "fee head")?;
    }

    let id = Uuid::new_v4().to_string();
    let tx = conn.unchecked_transaction().map_err(HandlerErr::tx)?;
    tx.execute(
        "INSERT INTO fee_structures(id, academic_year, class_name, program_course_id, shift, receipt_type_id, number_of_instalments, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &id,
            &academic_year,
            &class_name,
            &program_course_id,
            &shift,
            &p.receipt_type_id,
            p.number_of_instalments,
            db::now_rfc3339(),
        ),
    )
    .map_err(|e| {
        duplicate_or_insert(
            e,
            "fee_structures",
            format!("fee structure for {academic_year} {class_name}"),
        )
    })?;
    for (i, c) in p.components.iter().enumerate() {
        tx.execute(
            "INSERT INTO fee_structure_components(id, structure_id, fee_head_id, amount, is_concession_applicable, sequence)
             VALUES(?, ?, ?, ?, ?, ?)",
            (
                Uuid::new_v4().to_string(),
                &id,
                &c.fee_head_id,
                c.amount,
                c.is_concession_applicable as i64,
                c.sequence.unwrap_or(i as i64 + 1),
            ),
        )
        .map_err(|e| HandlerErr::insert(e, "fee_structure_components"))?;
    }
    tx.commit().map_err(HandlerErr::tx)?;
    Ok(json!({ "structure": structure_json(conn, &id)? }))
}

fn structures_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let p: StructureListParams = parse_params(params)?;
    let mut stmt = conn
        .prepare(
            "SELECT id FROM fee_structures
             WHERE (?1 IS NULL OR academic_year = ?1)
               AND (?2 IS NULL OR program_course_id = ?2)
             ORDER BY academic_year, class_name, shift",
        )
        .map_err(HandlerErr::query)?;
    let ids = stmt
        .query_map((&p.academic_year, &p.program_course_id), |r| r.get::<_, String>(0))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;
    let structures = ids
        .iter()
        .map(|id| structure_json(conn, id))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "structures": structures }))
}

fn structures_get(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let p: StructureIdParams = parse_params(params)?;
    Ok(json!({ "structure": structure_json(conn, &p.structure_id)? }))
}

fn structures_delete(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let p: StructureIdParams = parse_params(params)?;
    require(conn, "fee_structures", &p.structure_id, "fee structure")?;
    let refs = count_refs(
        conn,
        "SELECT COUNT(*) FROM student_fee_mappings WHERE structure_id = ?",
        &p.structure_id,
    )?;
    if refs > 0 {
        return Err(FeesError::InUse {
            what: "fee structure",
            by: "student fee mappings",
            count: refs,
        }
        .into());
    }
    let tx = conn.unchecked_transaction().map_err(HandlerErr::tx)?;
    tx.execute(
        "DELETE FROM fee_structure_components WHERE structure_id = ?",
        [&p.structure_id],
    )
    .map_err(|e| HandlerErr::new("db_delete_failed", e.to_string()))?;
    delete_row(&tx, "fee_structures", &p.structure_id, "fee structure")?;
    tx.commit().map_err(HandlerErr::tx)?;
    Ok(json!({ "ok": true }))
}

// Student fee mappings

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct MappingCreateParams {
    student_id: String,
    structure_id: String,
    #[serde(default)]
    concession_slab_id: Option<String>,
    #[serde(rename = "type")]
    mapping_type: String,
    #[serde(default)]
    instalment_number: Option<i64>,
    #[serde(default)]
    late_fee: f64,
    #[serde(default)]
    waived_off_amount: f64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct MappingUpdateParams {
    mapping_id: String,
    #[serde(default, deserialize_with = "double_option")]
    concession_slab_id: Option<Option<String>>,
    #[serde(default)]
    late_fee: Option<f64>,
    #[serde(default)]
    waived_off_amount: Option<f64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct MappingListParams {
    #[serde(default)]
    student_id: Option<String>,
    #[serde(default)]
    structure_id: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct PaymentParams {
    mapping_id: String,
    amount: f64,
    mode: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    transaction_ref: Option<String>,
    #[serde(default)]
    receipt_number: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct SummaryParams {
    #[serde(default)]
    academic_year: Option<String>,
}

fn mapping_json(conn: &Connection, id: &str) -> Result<Value, HandlerErr> {
    conn.query_row(
        "SELECT id, student_id, structure_id, concession_slab_id, mapping_type, instalment_number,
                base_amount, concession_amount, late_fee, waived_off_amount, total_payable,
                amount_paid, payment_status, payment_mode, transaction_ref, receipt_number,
                paid_at, created_at, updated_at
         FROM student_fee_mappings WHERE id = ?",
        [id],
        |r| {
            let total: f64 = r.get(10)?;
            let paid: f64 = r.get(11)?;
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "studentId": r.get::<_, String>(1)?,
                "structureId": r.get::<_, String>(2)?,
                "concessionSlabId": r.get::<_, Option<String>>(3)?,
                "type": r.get::<_, String>(4)?,
                "instalmentNumber": r.get::<_, Option<i64>>(5)?,
                "baseAmount": r.get::<_, f64>(6)?,
                "concessionAmount": r.get::<_, f64>(7)?,
                "lateFee": r.get::<_, f64>(8)?,
                "waivedOffAmount": r.get::<_, f64>(9)?,
                "totalPayable": total,
                "amountPaid": paid,
                "outstanding": (total - paid).max(0.0),
                "paymentStatus": r.get::<_, String>(12)?,
                "paymentMode": r.get::<_, Option<String>>(13)?,
                "transactionRef": r.get::<_, Option<String>>(14)?,
                "receiptNumber": r.get::<_, Option<String>>(15)?,
                "paidAt": r.get::<_, Option<String>>(16)?,
                "createdAt": r.get::<_, String>(17)?,
                "updatedAt": r.get::<_, String>(18)?,
            }))
        },
    )
    .optional()
    .map_err(HandlerErr::query)?
    .ok_or_else(|| FeesError::NotFound("fee mapping").into())
}

fn slab_rate(conn: &Connection, slab_id: Option<&str>) -> Result<Option<f64>, HandlerErr> {
    let Some(id) = slab_id else {
        return Ok(None);
    };
    conn.query_row(
        "SELECT default_rate FROM fee_concession_slabs WHERE id = ?",
        [id],
        |r| r.get::<_, f64>(0),
    )
    .optional()
    .map_err(HandlerErr::query)?
    .map(Some)
    .ok_or_else(|| FeesError::NotFound("concession slab").into())
}

/// Rewrites the stored breakdown from the mapping's current inputs.
fn recompute_mapping(conn: &Connection, mapping_id: &str) -> Result<payable::Breakdown, HandlerErr> {
    let (structure_id, slab_id, late_fee, waiver): (String, Option<String>, f64, f64) = conn
        .query_row(
            "SELECT structure_id, concession_slab_id, late_fee, waived_off_amount
             FROM student_fee_mappings WHERE id = ?",
            [mapping_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
        )
        .optional()
        .map_err(HandlerErr::query)?
        .ok_or(FeesError::NotFound("fee mapping"))?;
    let components = payable_components(conn, &structure_id)?;
    let rate = slab_rate(conn, slab_id.as_deref())?;
    let b = payable::compute(&components, rate, late_fee, waiver);
    conn.execute(
        "UPDATE student_fee_mappings SET
           base_amount = ?, concession_amount = ?, total_payable = ?, updated_at = ?
         WHERE id = ?",
        (
            b.base_amount,
            b.concession_amount,
            b.total_payable,
            db::now_rfc3339(),
            mapping_id,
        ),
    )
    .map_err(|e| HandlerErr::update(e, "student_fee_mappings"))?;
    Ok(b)
}

fn mappings_create(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let p: MappingCreateParams = parse_params(params)?;
    if !exists(conn, "students", &p.student_id)? {
        return Err(FeesError::NotFound("student").into());
    }
    require(conn, "fee_structures", &p.structure_id, "fee structure")?;
    let mapping_type = MappingType::parse(&p.mapping_type)?;
    let instalment = match (mapping_type, p.instalment_number) {
        (MappingType::Full, _) => None,
        (MappingType::Instalment, Some(n)) if n >= 1 => Some(n),
        (MappingType::Instalment, _) => {
            return Err(FeesError::Invalid("instalmentNumber is required for INSTALMENT".into()).into())
        }
    };
    let late_fee = check_amount("lateFee", p.late_fee)?;
    let waiver = check_amount("waivedOffAmount", p.waived_off_amount)?;
    let components = payable_components(conn, &p.structure_id)?;
    let b = payable::compute(&components, slab_rate(conn, p.concession_slab_id.as_deref())?, late_fee, waiver);

    let id = Uuid::new_v4().to_string();
    let now = db::now_rfc3339();
    conn.execute(
        "INSERT INTO student_fee_mappings(
           id, student_id, structure_id, concession_slab_id, mapping_type, instalment_number,
           base_amount, concession_amount, late_fee, waived_off_amount, total_payable,
           payment_status, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &id,
            &p.student_id,
            &p.structure_id,
            &p.concession_slab_id,
            mapping_type.as_str(),
            instalment,
            b.base_amount,
            b.concession_amount,
            b.late_fee,
            b.waived_off_amount,
            b.total_payable,
            PaymentStatus::Pending.as_str(),
            &now,
            &now,
        ),
    )
    .map_err(|e| HandlerErr::insert(e, "student_fee_mappings"))?;
    Ok(json!({ "mapping": mapping_json(conn, &id)? }))
}

fn mappings_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let p: MappingListParams = parse_params(params)?;
    let mut stmt = conn
        .prepare(
            "SELECT id FROM student_fee_mappings
             WHERE (?1 IS NULL OR student_id = ?1)
               AND (?2 IS NULL OR structure_id = ?2)
             ORDER BY created_at, instalment_number",
        )
        .map_err(HandlerErr::query)?;
    let ids = stmt
        .query_map((&p.student_id, &p.structure_id), |r| r.get::<_, String>(0))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;
    let mappings = ids
        .iter()
        .map(|id| mapping_json(conn, id))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "mappings": mappings }))
}

fn mappings_update(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let p: MappingUpdateParams = parse_params(params)?;
    require(conn, "student_fee_mappings", &p.mapping_id, "fee mapping")?;
    let tx = conn.unchecked_transaction().map_err(HandlerErr::tx)?;
    if let Some(slab) = &p.concession_slab_id {
        if let Some(id) = slab {
            require(&tx, "fee_concession_slabs", id, "concession slab")?;
        }
        tx.execute(
            "UPDATE student_fee_mappings SET concession_slab_id = ? WHERE id = ?",
            (slab, &p.mapping_id),
        )
        .map_err(|e| HandlerErr::update(e, "student_fee_mappings"))?;
    }
    if let Some(late_fee) = p.late_fee {
        let late_fee = check_amount("lateFee", late_fee)?;
        tx.execute(
            "UPDATE student_fee_mappings SET late_fee = ? WHERE id = ?",
            (late_fee, &p.mapping_id),
        )
        .map_err(|e| HandlerErr::update(e, "student_fee_mappings"))?;
    }
    if let Some(waiver) = p.waived_off_amount {
        let waiver = check_amount("waivedOffAmount", waiver)?;
        tx.execute(
            "UPDATE student_fee_mappings SET waived_off_amount = ? WHERE id = ?",
            (waiver, &p.mapping_id),
        )
        .map_err(|e| HandlerErr::update(e, "student_fee_mappings"))?;
    }
    let b = recompute_mapping(&tx, &p.mapping_id)?;
    tx.commit().map_err(HandlerErr::tx)?;
    tracing::debug!(mapping = %p.mapping_id, total = b.total_payable, "fee mapping recomputed");
    Ok(json!({ "mapping": mapping_json(conn, &p.mapping_id)? }))
}

/// COMPLETED adds to the amount paid, REFUNDED clears it; the other statuses
/// only record the attempt.
fn mappings_record_payment(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let p: PaymentParams = parse_params(params)?;
    let mode = PaymentMode::parse(&p.mode)?;
    let status = match p.status.as_deref() {
        Some(s) => PaymentStatus::parse(s)?,
        None => PaymentStatus::Completed,
    };
    let amount = check_amount("amount", p.amount)?;
    let (total, paid): (f64, f64) = conn
        .query_row(
            "SELECT total_payable, amount_paid FROM student_fee_mappings WHERE id = ?",
            [&p.mapping_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
        .map_err(HandlerErr::query)?
        .ok_or(FeesError::NotFound("fee mapping"))?;

    let new_paid = match status {
        PaymentStatus::Completed => {
            if amount <= 0.0 {
                return Err(FeesError::Invalid("amount must be greater than zero".into()).into());
            }
            if paid + amount > total {
                return Err(FeesError::Invalid(format!(
                    "payment of {amount} exceeds outstanding {}",
                    (total - paid).max(0.0)
                ))
                .into());
            }
            paid + amount
        }
        PaymentStatus::Refunded => 0.0,
        _ => paid,
    };
    let now = db::now_rfc3339();
    let paid_at = (status == PaymentStatus::Completed).then(|| now.clone());
    conn.execute(
        "UPDATE student_fee_mappings SET
           amount_paid = ?,
           payment_status = ?,
           payment_mode = ?,
           transaction_ref = COALESCE(?, transaction_ref),
           receipt_number = COALESCE(?, receipt_number),
           paid_at = COALESCE(?, paid_at),
           updated_at = ?
         WHERE id = ?",
        (
            new_paid,
            status.as_str(),
            mode.as_str(),
            &p.transaction_ref,
            &p.receipt_number,
            &paid_at,
            &now,
            &p.mapping_id,
        ),
    )
    .map_err(|e| HandlerErr::update(e, "student_fee_mappings"))?;
    tracing::info!(
        mapping = %p.mapping_id,
        mode = mode.as_str(),
        status = status.as_str(),
        amount,
        "fee payment recorded"
    );
    Ok(json!({ "mapping": mapping_json(conn, &p.mapping_id)? }))
}

fn collections_summary(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let p: SummaryParams = parse_params(params)?;
    let mut stmt = conn
        .prepare(
            "SELECT m.payment_status, COUNT(*), COALESCE(SUM(m.total_payable), 0), COALESCE(SUM(m.amount_paid), 0)
             FROM student_fee_mappings m
             JOIN fee_structures s ON s.id = m.structure_id
             WHERE (?1 IS NULL OR s.academic_year = ?1)
             GROUP BY m.payment_status",
        )
        .map_err(HandlerErr::query)?;
    let rows = stmt
        .query_map([&p.academic_year], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, i64>(1)?,
                r.get::<_, f64>(2)?,
                r.get::<_, f64>(3)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;

    let mut counts: BTreeMap<&'static str, i64> =
        PaymentStatus::ALL.iter().map(|s| (s.as_str(), 0)).collect();
    let (mut payable, mut paid, mut mappings) = (0.0_f64, 0.0_f64, 0_i64);
    for (status, n, total, received) in rows {
        if let Ok(st) = PaymentStatus::parse(&status) {
            *counts.entry(st.as_str()).or_default() += n;
        }
        mappings += n;
        payable += total;
        paid += received;
    }
    Ok(json!({
        "academicYear": p.academic_year,
        "mappings": mappings,
        "totalPayable": payable,
        "totalPaid": paid,
        "outstanding": (payable - paid).max(0.0),
        "byStatus": counts,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let handler: ConnHandler = match req.method.as_str() {
        "fees.heads.create" => heads_create,
        "fees.heads.list" => heads_list,
        "fees.heads.update" => heads_update,
        "fees.heads.delete" => heads_delete,
        "fees.concessionSlabs.create" => slabs_create,
        "fees.concessionSlabs.list" => slabs_list,
        "fees.concessionSlabs.update" => slabs_update,
        "fees.concessionSlabs.delete" => slabs_delete,
        "fees.receiptTypes.create" => receipts_create,
        "fees.receiptTypes.list" => receipts_list,
        "fees.receiptTypes.update" => receipts_update,
        "fees.receiptTypes.delete" => receipts_delete,
        "fees.structures.create" => structures_create,
        "fees.structures.list" => structures_list,
        "fees.structures.get" => structures_get,
        "fees.structures.delete" => structures_delete,
        "fees.studentMappings.create" => mappings_create,
        "fees.studentMappings.list" => mappings_list,
        "fees.studentMappings.update" => mappings_update,
        "fees.studentMappings.recordPayment" => mappings_record_payment,
        "fees.collections.summary" => collections_summary,
        _ => return None,
    };
    Some(with_conn(state, req, handler))
}
