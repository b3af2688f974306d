mod format;

pub use format::{format_duration, format_size, format_timestamp};
