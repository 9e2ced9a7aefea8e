#![forbid(unsafe_code)]

use fl_core::model::ObjectKind;

/// An immutable content-addressed object as read back from the store.
#[derive(Clone, Debug)]
pub struct CasObject {
    pub hash: String,
    pub kind: ObjectKind,
    pub data: Vec<u8>,
    pub size: u64,
}
