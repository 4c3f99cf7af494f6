use proptest::prelude::*;

/// Strategy for generating topic names the client would accept
pub fn topic_name_strategy() -> impl Strategy<Value = String> {
    "[a-zA-Z][a-zA-Z0-9._-]{0,48}"
}

/// Strategy for generating partition ids
pub fn partition_strategy() -> impl Strategy<Value = i32> {
    0i32..64
}

/// Operations against an opaque registry
#[derive(Debug, Clone)]
pub enum RegistryOp {
    Put,
    PutPersistent,
    /// Take back the n-th token handed out so far (modulo the count)
    Get(usize),
    Remove(usize),
}

pub fn registry_op_strategy() -> impl Strategy<Value = RegistryOp> {
    prop_oneof![
        3 => Just(RegistryOp::Put),
        1 => Just(RegistryOp::PutPersistent),
        3 => any::<usize>().prop_map(RegistryOp::Get),
        1 => any::<usize>().prop_map(RegistryOp::Remove),
    ]
}
