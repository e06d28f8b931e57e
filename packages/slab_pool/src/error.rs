use thiserror::Error;

/// Errors that can occur when configuring or using the pools in this crate.
///
/// Misuse such as releasing a pointer twice is not reported through this type. Those contracts
/// are expressed as `unsafe fn` safety requirements instead.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The slab size computed from the node layout and the number of nodes per slab does not
    /// fit into the address space.
    #[error(
        "a slab of {nodes_per_slab} nodes of {node_size} bytes each exceeds the size of virtual memory"
    )]
    LayoutTooLarge {
        /// Size in bytes of the node payload that was requested.
        node_size: usize,

        /// Number of nodes that each slab was to hold.
        nodes_per_slab: usize,
    },

    /// The alignment passed to the system allocator is not a power of two.
    #[error("alignment {alignment} is not a power of two")]
    InvalidAlignment {
        /// The alignment that was requested.
        alignment: usize,
    },

    /// The maximum array length requested for an array pool exceeds the supported maximum.
    #[error("maximum array length {max_length} exceeds the supported maximum of {}", crate::MAX_ARRAY_LENGTH)]
    MaxLengthOutOfRange {
        /// The maximum length that was requested.
        max_length: usize,
    },

    /// A rented or released array length maps to a size class that the pool does not serve.
    #[error("array length {length} is outside the range served by the pool (up to {max_length})")]
    LengthOutOfRange {
        /// The length that was requested or released.
        length: usize,

        /// The largest array length the pool serves.
        max_length: usize,
    },

    /// A released array does not have a length that the pool could have issued.
    #[error("array length {length} is not a power of two of at least 16")]
    InvalidArrayLength {
        /// The length of the released array.
        length: usize,
    },

    /// A released array was rented from a different pool.
    #[error("array was rented from pool {array_pool_id}, not from pool {pool_id}")]
    ForeignArray {
        /// Identifier of the pool that issued the array.
        array_pool_id: u64,

        /// Identifier of the pool the array was released to.
        pool_id: u64,
    },
}

/// A specialized `Result` type for pool operations, returning the crate's
/// [`Error`] type as the error value.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::fmt::Debug;

    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(Error: Send, Sync, Debug);

    #[test]
    fn messages_name_offending_values() {
        let error = Error::LengthOutOfRange {
            length: 5000,
            max_length: 4096,
        };
        let message = error.to_string();
        assert!(message.contains("5000"));
        assert!(message.contains("4096"));

        let error = Error::InvalidArrayLength { length: 24 };
        assert!(error.to_string().contains("24"));

        let error = Error::MaxLengthOutOfRange {
            max_length: 1 << 31,
        };
        assert!(error.to_string().contains(&(1_usize << 31).to_string()));
    }

    #[test]
    fn usable_in_result_context() {
        let result: Result<()> = Err(Error::InvalidAlignment { alignment: 3 });
        assert!(matches!(
            result,
            Err(Error::InvalidAlignment { alignment: 3 })
        ));
    }
}
