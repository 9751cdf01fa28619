pub mod api;
pub mod cast;
pub mod events;
pub mod poll;
pub mod roles;
pub mod sort;
