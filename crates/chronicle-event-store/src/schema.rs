//! Event store database schema.

/// SQL to create the domain messages table.
///
/// `aggregate_id` holds the identity's string form for lookups;
/// `serialized_aggregate_id`, `payload` and `metadata` hold serializer output.
pub const CREATE_DOMAIN_MESSAGES_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS domain_messages (
    id                      BIGSERIAL PRIMARY KEY,
    aggregate_id            TEXT NOT NULL,
    serialized_aggregate_id TEXT NOT NULL,
    event_name              VARCHAR(255) NOT NULL,
    playhead                BIGINT NOT NULL CHECK (playhead >= 0),
    payload                 TEXT NOT NULL,
    recorded_on             TIMESTAMPTZ NOT NULL,
    metadata                TEXT NOT NULL,
    UNIQUE (aggregate_id, playhead)
);

CREATE INDEX IF NOT EXISTS idx_domain_messages_aggregate_id
    ON domain_messages (aggregate_id, playhead);
";
