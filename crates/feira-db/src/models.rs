/// Database row types, mapping directly to SQLite rows.
/// Conversion into feira-types models happens in `queries`.

pub struct MessageRow {
    pub id: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub ad_id: Option<String>,
    pub content: Option<String>,
    pub image_url: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub address: Option<String>,
    pub read: bool,
    pub created_at: String,
}

pub struct ConversationRow {
    pub counterpart_id: String,
    pub last_message: MessageRow,
    pub unread_count: i64,
}
