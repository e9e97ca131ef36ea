//! # User Interface Module
//!
//! The web front end of the demo: `page` renders the HTML and `routes` wires
//! it to actix-web handlers backed by a shared code generator.

pub mod page;
pub mod routes;
