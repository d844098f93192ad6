diesel::table! {
    upload_records (id) {
        id -> Text,
        remote_upload_id -> Text,
        remote_upload_url -> Text,
        payload_len -> BigInt,
        status -> Text,
        created_at -> BigInt,
        retry_count -> Integer,
    }
}

diesel::table! {
    upload_record_segments (record_id, seq) {
        record_id -> Text,
        seq -> Integer,
        data -> Binary,
    }
}
