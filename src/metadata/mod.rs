pub mod builder;
pub mod config;

pub use builder::MetadataBuilder;
pub use config::{ConfigSource, Definition, Destination, DirConfigStore, ExtEvent, FieldDefinition};
