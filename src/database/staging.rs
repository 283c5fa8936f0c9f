// ===== STAGING DOCUMENT STORE =====
//
// Raw API payloads land here exactly as received, together with a snapshot
// of which tokens the batch covered. The processor consumes documents in
// insertion order and marks them processed; payloads are never mutated.

use chrono::Utc;
use rusqlite::{params, Connection};

use crate::types::{parse_timestamp, StagedTokenRef, StagingDocument};

/// Insert a staging document and return its id
///
/// `processed` is set by the fetcher when the document is a ledger-only
/// record of a failed batch (failures were already credited inline).
pub fn insert_document(
    conn: &Connection,
    blockchain: &str,
    token_refs: &[StagedTokenRef],
    raw_data: &serde_json::Value,
    processed: bool,
) -> Result<i64, String> {
    let tokens_json = serde_json::to_string(token_refs)
        .map_err(|e| format!("Failed to serialize token refs: {}", e))?;
    let raw_json = serde_json::to_string(raw_data)
        .map_err(|e| format!("Failed to serialize raw payload: {}", e))?;

    conn.execute(
        "INSERT INTO staging_documents (created_at, blockchain, tokens, processed, raw_data)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            Utc::now().to_rfc3339(),
            blockchain,
            tokens_json,
            processed as i64,
            raw_json
        ],
    )
    .map_err(|e| format!("Failed to insert staging document: {}", e))?;

    Ok(conn.last_insert_rowid())
}

/// Oldest unprocessed documents, bounded by `limit`
pub fn fetch_unprocessed(conn: &Connection, limit: usize) -> Result<Vec<StagingDocument>, String> {
    let mut stmt = conn
        .prepare(
            "SELECT doc_id, created_at, blockchain, tokens, processed, raw_data
             FROM staging_documents WHERE processed = 0
             ORDER BY doc_id ASC LIMIT ?1",
        )
        .map_err(|e| format!("Failed to prepare staging query: {}", e))?;

    let rows = stmt
        .query_map(params![limit as i64], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, i64>(4)?,
                row.get::<_, String>(5)?,
            ))
        })
        .map_err(|e| format!("Failed to query staging documents: {}", e))?;

    let mut documents = Vec::new();
    for row in rows {
        let (doc_id, created_at, blockchain, tokens_json, processed, raw_json) =
            row.map_err(|e| format!("Failed to read staging row: {}", e))?;

        let tokens: Vec<StagedTokenRef> = serde_json::from_str(&tokens_json)
            .map_err(|e| format!("Corrupt token refs in staging doc {}: {}", doc_id, e))?;
        let raw_data: serde_json::Value = serde_json::from_str(&raw_json)
            .map_err(|e| format!("Corrupt payload in staging doc {}: {}", doc_id, e))?;

        documents.push(StagingDocument {
            doc_id,
            created_at: parse_timestamp(&created_at).unwrap_or_else(Utc::now),
            blockchain,
            tokens,
            processed: processed != 0,
            raw_data,
        });
    }
    Ok(documents)
}

pub fn mark_processed(conn: &Connection, doc_id: i64) -> Result<(), String> {
    conn.execute(
        "UPDATE staging_documents SET processed = 1 WHERE doc_id = ?1",
        params![doc_id],
    )
    .map_err(|e| format!("Failed to mark staging doc {} processed: {}", doc_id, e))?;
    Ok(())
}

pub fn count_unprocessed(conn: &Connection) -> Result<i64, String> {
    conn.query_row(
        "SELECT COUNT(*) FROM staging_documents WHERE processed = 0",
        [],
        |row| row.get(0),
    )
    .map_err(|e| format!("Failed to count unprocessed staging docs: {}", e))
}

// ===== TESTS =====

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::schema;
    use serde_json::json;

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        schema::initialize_schema(&conn).unwrap();
        conn
    }

    fn sample_refs() -> Vec<StagedTokenRef> {
        vec![StagedTokenRef {
            token_id: 1,
            contract_address: "0xAAA".to_string(),
            pair_address: None,
        }]
    }

    #[test]
    fn test_roundtrip_document() {
        let conn = test_conn();
        let raw = json!({ "pairs": [{ "pairAddress": "0xP" }] });

        let id = insert_document(&conn, "ethereum", &sample_refs(), &raw, false).unwrap();
        let docs = fetch_unprocessed(&conn, 10).unwrap();

        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].doc_id, id);
        assert_eq!(docs[0].blockchain, "ethereum");
        assert_eq!(docs[0].tokens, sample_refs());
        assert_eq!(docs[0].raw_data, raw);
        assert!(!docs[0].processed);
    }

    #[test]
    fn test_fetch_respects_limit_and_order() {
        let conn = test_conn();
        for i in 0..5 {
            insert_document(&conn, "bsc", &sample_refs(), &json!({ "n": i }), false).unwrap();
        }

        let docs = fetch_unprocessed(&conn, 3).unwrap();
        assert_eq!(docs.len(), 3);
        // Oldest first
        assert!(docs[0].doc_id < docs[1].doc_id);
        assert!(docs[1].doc_id < docs[2].doc_id);
        assert_eq!(count_unprocessed(&conn).unwrap(), 5);
    }

    #[test]
    fn test_mark_processed_removes_from_queue() {
        let conn = test_conn();
        let id = insert_document(&conn, "base", &sample_refs(), &json!({}), false).unwrap();

        mark_processed(&conn, id).unwrap();
        assert!(fetch_unprocessed(&conn, 10).unwrap().is_empty());
        assert_eq!(count_unprocessed(&conn).unwrap(), 0);
    }

    #[test]
    fn test_ledger_documents_skip_processing() {
        let conn = test_conn();
        insert_document(&conn, "base", &sample_refs(), &json!(null), true).unwrap();
        assert!(fetch_unprocessed(&conn, 10).unwrap().is_empty());
    }

    #[test]
    fn test_processed_documents_are_retained() {
        let conn = test_conn();
        let id = insert_document(&conn, "bsc", &sample_refs(), &json!({}), false).unwrap();
        mark_processed(&conn, id).unwrap();

        // The buffer is append-only; processed rows stay as an audit trail
        let total: i64 = conn
            .query_row("SELECT COUNT(*) FROM staging_documents", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(total, 1);
        assert_eq!(count_unprocessed(&conn).unwrap(), 0);
    }
}
