pub mod api;
pub mod book;
pub mod content;
pub mod epub;
pub mod fb2;
pub mod images;
pub mod pipeline;
