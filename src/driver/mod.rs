pub mod bridge;
pub mod catalog;
pub mod governor;
pub mod script;
