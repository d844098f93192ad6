use std::time::Duration;

use diesel::{
    Connection, RunQueryDsl, SqliteConnection,
    connection::SimpleConnection,
    r2d2::{ConnectionManager, CustomizeConnection, Error as R2d2Error, Pool},
    sql_types::Integer,
};
use tracing::info;

use crate::domain::errors::UplinkError;

/// Bumped whenever the table layout below changes.
pub const SCHEMA_VERSION: i32 = 2;

const CREATE_SCHEMA_V1: &str = "
    CREATE TABLE IF NOT EXISTS upload_records (
        id TEXT PRIMARY KEY NOT NULL,
        remote_upload_id TEXT NOT NULL,
        remote_upload_url TEXT NOT NULL,
        payload BLOB NOT NULL,
        status TEXT NOT NULL DEFAULT 'pending',
        created_at BIGINT NOT NULL,
        retry_count INTEGER NOT NULL DEFAULT 0
    );
    CREATE INDEX IF NOT EXISTS idx_upload_records_status ON upload_records (status);
    CREATE INDEX IF NOT EXISTS idx_upload_records_created_at ON upload_records (created_at);
    PRAGMA user_version = 1;
";

// A single BLOB is capped by SQLITE_MAX_LENGTH (1e9 bytes by default), so
// payloads move to an ordered segment table.
const MIGRATE_V1_TO_V2: &str = "
    CREATE TABLE upload_record_segments (
        record_id TEXT NOT NULL,
        seq INTEGER NOT NULL,
        data BLOB NOT NULL,
        PRIMARY KEY (record_id, seq)
    );
    INSERT INTO upload_record_segments (record_id, seq, data)
        SELECT id, 0, payload FROM upload_records WHERE length(payload) > 0;
    ALTER TABLE upload_records ADD COLUMN payload_len BIGINT NOT NULL DEFAULT 0;
    UPDATE upload_records SET payload_len = length(payload);
    ALTER TABLE upload_records DROP COLUMN payload;
    PRAGMA user_version = 2;
";

#[derive(Debug, Default)]
struct SqlitePragmas;

impl CustomizeConnection<SqliteConnection, R2d2Error> for SqlitePragmas {
    fn on_acquire(&self, conn: &mut SqliteConnection) -> std::result::Result<(), R2d2Error> {
        conn.batch_execute(
            "PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL; PRAGMA busy_timeout = 5000;",
        )
        .map_err(R2d2Error::QueryError)
    }
}

pub type SqlitePoolSquad = Pool<ConnectionManager<SqliteConnection>>;

#[derive(diesel::QueryableByName)]
struct UserVersion {
    #[diesel(sql_type = Integer)]
    user_version: i32,
}

/// Opens the store file with a single pooled connection, so at most one
/// connection is ever open, and brings the schema up to date.
pub fn establish_connection(database_path: &str) -> Result<SqlitePoolSquad, UplinkError> {
    let manager = ConnectionManager::<SqliteConnection>::new(database_path);
    let pool = Pool::builder()
        .max_size(1)
        .min_idle(Some(1))
        .idle_timeout(None)
        .max_lifetime(None)
        .connection_timeout(Duration::from_secs(30))
        .connection_customizer(Box::new(SqlitePragmas))
        .build(manager)
        .map_err(|err| UplinkError::StorageUnavailable(format!("failed to open store: {err}")))?;

    let mut conn = pool.get()?;
    migrate(&mut conn)?;

    Ok(pool)
}

fn migrate(conn: &mut SqliteConnection) -> Result<(), UplinkError> {
    let version = diesel::sql_query("PRAGMA user_version")
        .get_result::<UserVersion>(conn)?
        .user_version;

    if version > SCHEMA_VERSION {
        return Err(UplinkError::StorageUnavailable(format!(
            "store schema v{} is newer than supported v{}",
            version, SCHEMA_VERSION
        )));
    }

    if version < 1 {
        conn.batch_execute(CREATE_SCHEMA_V1)?;
    }
    if version < 2 {
        conn.immediate_transaction::<_, UplinkError, _>(|conn| {
            conn.batch_execute(MIGRATE_V1_TO_V2)?;
            Ok(())
        })?;
    }
    if version < SCHEMA_VERSION {
        info!(from = version, to = SCHEMA_VERSION, "sqlite: store schema migrated");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(diesel::QueryableByName)]
    struct SegmentRow {
        #[diesel(sql_type = diesel::sql_types::Text)]
        record_id: String,
        #[diesel(sql_type = diesel::sql_types::Binary)]
        data: Vec<u8>,
    }

    #[test]
    fn v1_store_moves_payloads_into_segments() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.sqlite3");
        let path = path.to_str().unwrap();

        {
            let mut conn = SqliteConnection::establish(path).unwrap();
            conn.batch_execute(CREATE_SCHEMA_V1).unwrap();
            conn.batch_execute(
                "INSERT INTO upload_records
                    (id, remote_upload_id, remote_upload_url, payload, status, created_at, retry_count)
                 VALUES ('r1', 'up_1', 'https://storage.test/u/1', x'0a0b0c', 'failed', 5, 2);",
            )
            .unwrap();
        }

        let pool = establish_connection(path).unwrap();
        let mut conn = pool.get().unwrap();

        let version = diesel::sql_query("PRAGMA user_version")
            .get_result::<UserVersion>(&mut conn)
            .unwrap()
            .user_version;
        assert_eq!(version, SCHEMA_VERSION);

        let segments = diesel::sql_query("SELECT record_id, data FROM upload_record_segments")
            .load::<SegmentRow>(&mut conn)
            .unwrap();
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].record_id, "r1");
        assert_eq!(segments[0].data, vec![0x0a, 0x0b, 0x0c]);
    }
}
