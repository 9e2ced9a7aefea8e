#![forbid(unsafe_code)]

#[derive(Clone, Debug)]
pub struct KindStats {
    pub kind: String,
    pub count: i64,
    pub bytes: i64,
}

#[derive(Clone, Debug)]
pub struct StoreStats {
    pub total_objects: i64,
    pub total_bytes: i64,
    pub by_kind: Vec<KindStats>,
}
