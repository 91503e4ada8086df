pub mod placeholders;

pub use placeholders::{PlaceholderScanner, PositionalSql};
