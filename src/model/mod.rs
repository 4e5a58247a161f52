pub mod events;
pub mod metadata;
pub mod record;
