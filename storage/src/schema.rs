// Schema for the per-node local metadata index (§4.6a). One connection per
// service opens the same file; SQLite's own locking arbitrates concurrent
// writers, matching §5's "one database connection per service" rule.

use base::Error;
use rusqlite::Connection;

pub fn ensure_schema(conn: &Connection) -> Result<(), Error> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS segment (
            id                         INTEGER PRIMARY KEY,
            collection_id              INTEGER NOT NULL,
            key                        TEXT NOT NULL,
            unified_id                 TEXT NOT NULL,
            conjoined_part             INTEGER NOT NULL,
            segment_num                INTEGER NOT NULL,
            timestamp_micros           INTEGER NOT NULL,
            file_size                  INTEGER,
            file_adler32               INTEGER,
            file_hash                  BLOB,
            status                     TEXT NOT NULL,
            handoff_node_id            TEXT,
            file_tombstone_unified_id  TEXT,
            source_node_id             TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS segment_key_idx
            ON segment (collection_id, key, timestamp_micros);
        CREATE INDEX IF NOT EXISTS segment_unified_idx
            ON segment (unified_id, conjoined_part, segment_num);
        CREATE INDEX IF NOT EXISTS segment_audit_idx
            ON segment (collection_id, status, handoff_node_id, key, timestamp_micros);

        CREATE TABLE IF NOT EXISTS sequence (
            segment_id          INTEGER NOT NULL,
            sequence_num        INTEGER NOT NULL,
            value_file_id        INTEGER NOT NULL,
            offset              INTEGER NOT NULL,
            size                INTEGER NOT NULL,
            hash                BLOB NOT NULL,
            adler32             INTEGER NOT NULL,
            zfec_padding_size   INTEGER NOT NULL,
            PRIMARY KEY (segment_id, sequence_num)
        );

        CREATE TABLE IF NOT EXISTS value_file (
            id                          INTEGER PRIMARY KEY,
            size                        INTEGER NOT NULL,
            hash                        BLOB,
            sequence_count              INTEGER NOT NULL,
            min_segment_id              INTEGER,
            max_segment_id              INTEGER,
            distinct_collection_count   INTEGER NOT NULL,
            collection_ids              TEXT NOT NULL,
            sealed                      INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS conjoined (
            collection_id       INTEGER NOT NULL,
            key                 TEXT NOT NULL,
            unified_id          TEXT NOT NULL,
            create_timestamp    INTEGER NOT NULL,
            complete_timestamp  INTEGER,
            PRIMARY KEY (collection_id, key, unified_id)
        );

        CREATE TABLE IF NOT EXISTS audit_result (
            row_id           INTEGER PRIMARY KEY,
            collection_id    INTEGER NOT NULL,
            start_timestamp  INTEGER NOT NULL,
            retry_count      INTEGER NOT NULL,
            state            TEXT NOT NULL,
            end_timestamp    INTEGER
        );
        "#,
    )?;
    Ok(())
}
