mod key_scheme;

pub use key_scheme::combine_key;
pub use key_scheme::time_range_to_buckets;
pub use key_scheme::time_to_bucket;
pub use key_scheme::KeyScheme;
